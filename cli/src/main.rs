//! Passport assign CLI - line-edited client for the assignment wizard

mod client;
mod editor;
mod messages;
mod prompt;
mod render;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use crate::client::WizardClient;
use crate::editor::LineEditor;
use crate::messages::{ClientMessage, Contact, Unit};

#[derive(Parser)]
#[command(name = "passport-assign")]
#[command(about = "Assign passport data responsibilities to supply-chain partners")]
#[command(version)]
struct Cli {
    /// Server URL
    #[arg(short, long, default_value = "ws://localhost:3000")]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Walk through the assignment wizard interactively
    Wizard {
        /// Passport ID
        #[arg(short, long)]
        passport: Uuid,

        /// Keep command history in this file
        #[arg(long)]
        history: Option<PathBuf>,
    },

    /// Create one invite without prompting
    Assign {
        /// Passport ID
        #[arg(short, long)]
        passport: Uuid,

        /// Partner role, e.g. material_supplier
        #[arg(short, long)]
        role: String,

        /// Partner email address
        #[arg(short, long)]
        email: String,

        /// Partner company
        #[arg(short, long)]
        company: Option<String>,

        /// contribute or review
        #[arg(short, long, default_value = "contribute")]
        mode: String,

        /// Units to delegate: block:<id> or <field>/<instance>
        #[arg(short, long = "unit", required = true)]
        units: Vec<Unit>,

        /// Send the invitation right away
        #[arg(long)]
        notify: bool,
    },

    /// Print grant changes on a passport as they happen
    Watch {
        /// Passport ID
        #[arg(short, long)]
        passport: Uuid,

        /// Exit after the first change
        #[arg(long)]
        once: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "passport_assign_cli=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Wizard { passport, history } => {
            run_wizard(&cli.server, passport, history).await
        }
        Commands::Assign {
            passport,
            role,
            email,
            company,
            mode,
            units,
            notify,
        } => {
            let contact = Contact {
                email,
                name: None,
                company,
                message: None,
            };
            run_assign(&cli.server, passport, role, contact, mode, units, notify).await
        }
        Commands::Watch { passport, once } => run_watch(&cli.server, passport, once).await,
    }
}

async fn run_wizard(server: &str, passport_id: Uuid, history: Option<PathBuf>) -> Result<()> {
    let (mut client, view) = WizardClient::connect(server, passport_id).await?;
    let mut editor = LineEditor::spawn(history);
    render::view(&view);
    editor.learn(&view);
    println!("{}", prompt::HELP);

    let mut stage = view.state.stage;
    while let Some(line) = editor.next_line(&stage).await {
        let command = match prompt::parse(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(e) => {
                println!("! {}", e);
                continue;
            }
        };

        match command {
            prompt::Command::Send(msg) => {
                let reply = client.request(msg).await?;
                render::reply(&reply);
                editor.learn(&reply.view);
                stage = reply.view.state.stage;
            }
            prompt::Command::Help => println!("{}", prompt::HELP),
            prompt::Command::Quit => break,
        }
    }

    Ok(())
}

async fn run_assign(
    server: &str,
    passport_id: Uuid,
    role: String,
    contact: Contact,
    mode: String,
    units: Vec<Unit>,
    notify: bool,
) -> Result<()> {
    let (mut client, _) = WizardClient::connect(server, passport_id).await?;

    let steps = [
        ClientMessage::ChooseRole { role },
        ClientMessage::EnterContact { contact },
        ClientMessage::ChooseMode { mode },
        ClientMessage::SelectScope { units },
    ];
    for step in steps {
        let reply = client.request(step).await?;
        if let Some((message, _)) = reply.error {
            return Err(anyhow!(message));
        }
        if reply.view.state.skipped.is_some() {
            render::view(&reply.view);
            return Err(anyhow!("Nothing left to assign for this role and mode"));
        }
    }

    let reply = client.request(ClientMessage::Commit { notify }).await?;
    if let Some((message, units)) = reply.error {
        let units: Vec<String> = units.iter().map(|u| u.to_string()).collect();
        return Err(anyhow!("{} [{}]", message, units.join(" ")));
    }
    let (invite, notification_error) = reply
        .committed
        .ok_or_else(|| anyhow!("Server did not confirm the invite"))?;

    println!("{}", invite.id);
    if let Some(e) = notification_error {
        eprintln!("Invitation not sent: {}", e);
    }
    Ok(())
}

async fn run_watch(server: &str, passport_id: Uuid, once: bool) -> Result<()> {
    let (mut client, _) = WizardClient::connect(server, passport_id).await?;
    println!("Watching passport {}...", passport_id);

    client
        .watch(|event, _| {
            render::change(event);
            !once
        })
        .await
}
