use crate::cli::HistoryCommand;
use crate::config::Config;
use crate::error::{is_not_found, ChatwireError, Result};
use crate::identity::resolve_owner_id;
use crate::persistence::{HttpRemoteStore, RemoteSession, RemoteStore};
use colored::Colorize;
use prettytable::{format, Table};

/// Handle history commands
pub async fn handle_history(config: &Config, command: HistoryCommand) -> Result<()> {
    if !config.persistence.enabled {
        return Err(ChatwireError::Config(
            "persistence is disabled; history is not available".to_string(),
        )
        .into());
    }
    let store = HttpRemoteStore::new(config.persistence.base_url.clone())?;

    match command {
        HistoryCommand::List => {
            let owner_id = resolve_owner_id(&config.persistence)?;
            let sessions = store.list(&owner_id).await?;
            print_sessions(&sessions);
        }
        HistoryCommand::Show { id } => match store.fetch(&id).await {
            Ok(session) => print_transcript(&session),
            Err(e) if is_not_found(&e) => {
                println!("{}", format!("No conversation with id {}", id).yellow())
            }
            Err(e) => return Err(e),
        },
        HistoryCommand::Delete { id } => match store.delete(&id).await {
            Ok(()) => println!("{}", format!("Deleted conversation {}", id).green()),
            Err(e) if is_not_found(&e) => {
                println!("{}", format!("No conversation with id {}", id).yellow())
            }
            Err(e) => return Err(e),
        },
    }

    Ok(())
}

fn print_sessions(sessions: &[RemoteSession]) {
    if sessions.is_empty() {
        println!("{}", "No conversation history found.".yellow());
        return;
    }

    let mut table = Table::new();
    table.set_format(*format::consts::FORMAT_BORDERS_ONLY);

    table.add_row(prettytable::row![
        "ID".bold(),
        "Title".bold(),
        "Messages".bold(),
        "Last Updated".bold()
    ]);

    for session in sessions {
        let updated = session
            .last_updated
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "-".to_string());

        table.add_row(prettytable::row![
            session.id.cyan(),
            display_title(&session.title),
            session.messages.len(),
            updated
        ]);
    }

    println!("\nConversation History:");
    table.printstd();
    println!();
    println!(
        "Use {} to read one or {} to remove one.",
        "chatwire history show <ID>".cyan(),
        "chatwire history delete <ID>".cyan()
    );
    println!();
}

fn print_transcript(session: &RemoteSession) {
    println!("\n{}", session.title.bold());
    if session.messages.is_empty() {
        println!("{}", "(no messages)".dimmed());
    }
    for message in &session.messages {
        println!("\n{}", role_label(&message.role));
        println!("{}", message.content);
    }
    println!();
}

fn role_label(role: &str) -> colored::ColoredString {
    match role {
        "user" => "You:".cyan().bold(),
        "assistant" => "Assistant:".green().bold(),
        other => format!("{}:", other).dimmed(),
    }
}

fn display_title(title: &str) -> String {
    if title.chars().count() > 40 {
        let cut: String = title.chars().take(37).collect();
        format!("{}...", cut)
    } else {
        title.to_string()
    }
}
