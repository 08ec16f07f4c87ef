//! Plain-text rendering of wizard views

use crate::client::Reply;
use crate::messages::{AssignmentEvent, Invite, WizardView};

pub fn reply(reply: &Reply) {
    for event in &reply.changes {
        change(event);
    }
    if let Some((message, units)) = &reply.error {
        println!("! {}", message);
        for unit in units {
            println!("    {}", unit);
        }
    }
    if let Some((invite, notification_error)) = &reply.committed {
        println!("Saved invite {} for {} ({})", invite.id, invite.email, invite.state);
        if let Some(e) = notification_error {
            println!("! Invitation not sent: {}", e);
        }
    }
    view(&reply.view);
}

pub fn change(event: &AssignmentEvent) {
    println!("* {} ({})", event.event.replace('_', " "), event.invite_id);
}

pub fn view(view: &WizardView) {
    let state = &view.state;
    println!("{:─<60}", "");
    println!("Passport {} - {}", state.passport_id, state.stage.replace('_', " "));

    match state.stage.as_str() {
        "role_selection" => {
            for option in &view.roles {
                println!("  {:<20} {}", option.role, option.label);
            }
        }
        "contact_details" => {
            println!("  Role: {}", state.role.as_deref().unwrap_or("-"));
        }
        "mode_selection" => {
            println!("  Modes: {}", state.available_modes.join(", "));
        }
        "scope_selection" | "summary" => {
            if let Some(reason) = &state.skipped {
                println!("  Nothing left to assign ({})", reason.replace('_', " "));
            }
            if let Some(contact) = &state.contact {
                println!("  Contact: {}", contact.email);
            }
            if let Some(mode) = &state.mode {
                println!("  Mode: {}", mode);
            }
            for status in &view.units {
                let marker = if state.selection.contains(&status.unit) {
                    "[x]"
                } else if state.conflicts.contains(&status.unit) {
                    "[!]"
                } else if status.available {
                    "[ ]"
                } else {
                    "[-]"
                };
                let holder = status
                    .owner
                    .as_ref()
                    .map(|h| format!(" owned by {}", h.email))
                    .unwrap_or_default();
                let reviews = if status.reviewers.is_empty() {
                    String::new()
                } else {
                    format!(" ({} reviewing)", status.reviewers.len())
                };
                println!(
                    "  {} {:<36} {}{}{}",
                    marker,
                    status.unit.to_string(),
                    status.label,
                    holder,
                    reviews
                );
            }
        }
        _ => {}
    }

    if !view.committed.is_empty() {
        println!("  Committed this session:");
        for invite in &view.committed {
            committed(invite);
        }
    }
}

fn committed(invite: &Invite) {
    let sent = invite
        .notified_at
        .map(|t| format!(", sent {}", t.format("%Y-%m-%d %H:%M")))
        .unwrap_or_default();
    let units: Vec<String> = invite.units.iter().map(|u| u.to_string()).collect();
    println!(
        "    {} {} {} [{}] {}{}",
        invite.email,
        invite.role,
        invite.mode,
        units.join(" "),
        invite.state,
        sent
    );
}
