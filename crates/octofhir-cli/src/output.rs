use colored::Colorize;
use octofhir_realtime::{ConnectionStatus, ResourceUpdateEvent, UpdateAction};

pub fn print_success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

pub fn print_error(msg: &str) {
    eprintln!("{} {}", "✗".red(), msg);
}

/// One line per update: action, reference, patient and room scope.
pub fn print_update(event: &ResourceUpdateEvent, json: bool) {
    if json {
        match serde_json::to_string(event) {
            Ok(line) => println!("{line}"),
            Err(e) => print_error(&format!("Cannot serialize update: {e}")),
        }
        return;
    }
    println!("{}", update_line(event));
}

fn update_line(event: &ResourceUpdateEvent) -> String {
    let action = match event.action {
        UpdateAction::Created => "created".green(),
        UpdateAction::Updated => "updated".yellow(),
        UpdateAction::Deleted => "deleted".red(),
    };
    let mut line = format!("{action:>7} {}", event.reference().cyan());
    if let Some(patient) = &event.patient_id {
        line.push_str(&format!(" patient={patient}"));
    }
    if let Some(room) = &event.room {
        line.push_str(&format!(" room={room}"));
    }
    line
}

pub fn print_status(status: ConnectionStatus) {
    let label = match status {
        ConnectionStatus::Connected => status.as_str().green(),
        ConnectionStatus::Disconnected | ConnectionStatus::Error => status.as_str().yellow(),
        ConnectionStatus::Failed | ConnectionStatus::AuthFailed => status.as_str().red(),
    };
    eprintln!("{} {}", "●".dimmed(), label);
}
