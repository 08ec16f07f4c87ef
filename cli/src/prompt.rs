//! Line commands of the interactive wizard

use anyhow::{anyhow, Result};

use crate::messages::{ClientMessage, Contact, Unit};

pub const HELP: &str = "\
Commands:
  role <role>                      choose the partner role
  contact <email> [company...]     enter contact details
  mode contribute|review           choose the responsibility mode
  scope <unit> [unit...]           select block:<id> or <field>/<instance>
  back                             return to the previous step
  commit [notify]                  save the invite, optionally sending it
  another                          start the next invite
  state                            show the current step
  help                             show this help
  quit                             leave the wizard";

#[derive(Debug)]
pub enum Command {
    Send(ClientMessage),
    Help,
    Quit,
}

pub fn parse(line: &str) -> Result<Option<Command>> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Ok(None);
    };
    let rest: Vec<&str> = words.collect();

    let command = match verb {
        "role" => {
            if rest.is_empty() {
                return Err(anyhow!("usage: role <role>"));
            }
            // Labels like "Material supplier" are accepted as typed
            Command::Send(ClientMessage::ChooseRole {
                role: rest.join(" "),
            })
        }
        "contact" => {
            let (email, company) = rest
                .split_first()
                .ok_or_else(|| anyhow!("usage: contact <email> [company...]"))?;
            Command::Send(ClientMessage::EnterContact {
                contact: Contact {
                    email: email.to_string(),
                    name: None,
                    company: (!company.is_empty()).then(|| company.join(" ")),
                    message: None,
                },
            })
        }
        "mode" => match rest.as_slice() {
            [mode] => Command::Send(ClientMessage::ChooseMode {
                mode: mode.to_string(),
            }),
            _ => return Err(anyhow!("usage: mode contribute|review")),
        },
        "scope" => {
            if rest.is_empty() {
                return Err(anyhow!("usage: scope <unit> [unit...]"));
            }
            let units = rest
                .iter()
                .map(|u| u.parse::<Unit>())
                .collect::<Result<Vec<_>, _>>()?;
            Command::Send(ClientMessage::SelectScope { units })
        }
        "back" => Command::Send(ClientMessage::Back),
        "commit" => Command::Send(ClientMessage::Commit {
            notify: rest.first() == Some(&"notify"),
        }),
        "another" => Command::Send(ClientMessage::AddAnother),
        "state" => Command::Send(ClientMessage::GetState),
        "help" | "?" => Command::Help,
        "quit" | "exit" => Command::Quit,
        other => return Err(anyhow!("Unknown command: {} (try help)", other)),
    };
    Ok(Some(command))
}
