/*!
Command handlers for the CLI

This module provides command handlers invoked by the CLI entrypoint:

- `chat`: interactive chat mode
- `history`: remote conversation listing and deletion
*/

// Remote history management
pub mod history;

// Special commands parser for session management
pub mod special_commands;

// Chat command handler
pub mod chat {
    //! Interactive chat mode handler.
    //!
    //! Builds the engine from configuration and runs a readline loop. Plain
    //! input starts a turn; the reply is printed as it grows by following
    //! the engine's content events.

    use std::io::Write;
    use std::sync::Arc;

    use colored::Colorize;
    use rustyline::error::ReadlineError;
    use rustyline::DefaultEditor;
    use tokio::sync::broadcast::{self, error::RecvError};

    use crate::commands::special_commands::{parse_special_command, print_help, SpecialCommand};
    use crate::config::Config;
    use crate::engine::{ChatEngine, EngineEvent, TurnHandle, TurnOutcome, TurnState};
    use crate::error::Result;
    use crate::identity::resolve_owner_id;
    use crate::persistence::{HttpRemoteStore, PersistenceSynchronizer};
    use crate::service::HttpModelService;
    use crate::session::SharedSessionStore;

    /// Start interactive chat mode
    ///
    /// # Arguments
    ///
    /// * `config` - Global configuration (consumed)
    pub async fn run_chat(config: Config) -> Result<()> {
        tracing::info!("Starting interactive chat mode");

        let store = SharedSessionStore::default();
        let service = Arc::new(HttpModelService::new(config.service.clone())?);
        let persistence = build_persistence(&config, &store)?;
        let engine = ChatEngine::new(store, service, persistence, config.engine.clone());

        match engine.load_remote_sessions().await {
            Ok(0) => {}
            Ok(count) => println!("{}", format!("Loaded {} saved sessions", count).green()),
            Err(e) => tracing::warn!("Could not load saved sessions: {:#}", e),
        }

        let mut rl = DefaultEditor::new()?;
        print_welcome_banner(&engine);

        loop {
            let prompt = format_prompt(&engine);
            match rl.readline(&prompt) {
                Ok(line) => {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }

                    let command = match parse_special_command(trimmed) {
                        Ok(command) => command,
                        Err(e) => {
                            println!("{}\n", e.to_string().red());
                            continue;
                        }
                    };

                    match command {
                        SpecialCommand::NewSession => {
                            engine.create_session();
                            println!("{}\n", "Started a new session".green());
                            continue;
                        }
                        SpecialCommand::ListSessions => {
                            print_sessions(&engine);
                            continue;
                        }
                        SpecialCommand::SwitchSession(position) => {
                            switch_session(&engine, position);
                            continue;
                        }
                        SpecialCommand::Rename(title) => {
                            let id = engine.active_session_id();
                            if engine.rename_session(&id, &title) {
                                println!("{}\n", format!("Renamed to '{}'", title).green());
                            }
                            continue;
                        }
                        SpecialCommand::DeleteSession => {
                            let id = engine.active_session_id();
                            if engine.delete_session(&id) {
                                println!("{}\n", "Session deleted".green());
                            } else {
                                println!("{}\n", "The last session cannot be deleted".yellow());
                            }
                            continue;
                        }
                        SpecialCommand::Help => {
                            print_help();
                            continue;
                        }
                        SpecialCommand::Exit => break,
                        SpecialCommand::None => {}
                    }

                    rl.add_history_entry(trimmed)?;

                    let events = engine.subscribe();
                    match engine.send_message(trimmed) {
                        Some(turn) => render_turn(&engine, events, turn).await,
                        None => println!("{}\n", "A reply is still in progress".yellow()),
                    }
                }
                Err(ReadlineError::Interrupted) => {
                    println!("^C");
                    continue;
                }
                Err(ReadlineError::Eof) => break,
                Err(err) => {
                    tracing::error!("Readline error: {:?}", err);
                    break;
                }
            }
        }

        engine.shutdown();
        println!("Goodbye!");
        Ok(())
    }

    fn build_persistence(
        config: &Config,
        store: &SharedSessionStore,
    ) -> Result<Option<PersistenceSynchronizer>> {
        if !config.persistence.enabled {
            tracing::info!("Persistence disabled; sessions stay in memory");
            return Ok(None);
        }
        let owner_id = resolve_owner_id(&config.persistence)?;
        let remote = HttpRemoteStore::new(config.persistence.base_url.clone())?;
        Ok(Some(PersistenceSynchronizer::new(
            store.clone(),
            Arc::new(remote),
            owner_id,
        )))
    }

    /// Print the reply as it grows until the turn ends
    async fn render_turn(
        engine: &ChatEngine,
        mut events: broadcast::Receiver<EngineEvent>,
        turn: TurnHandle,
    ) {
        let mut shown = String::new();
        println!();

        loop {
            match events.recv().await {
                Ok(EngineEvent::ContentUpdated {
                    message, content, ..
                }) if message == turn.message_id => {
                    print_growth(&mut shown, &content);
                }
                Ok(EngineEvent::TurnStateChanged { message, state, .. })
                    if message == turn.message_id && state == TurnState::FallbackSync =>
                {
                    if !shown.is_empty() {
                        println!();
                    }
                    println!("{}", "(stream interrupted, retrying)".dimmed());
                    shown.clear();
                }
                Ok(EngineEvent::TurnFinished {
                    message, outcome, ..
                }) if message == turn.message_id => {
                    // Catch up on anything missed while lagging.
                    let last = engine
                        .store()
                        .snapshot(&turn.session_id)
                        .and_then(|s| s.message(&turn.message_id).map(|m| m.content.clone()));
                    if let Some(content) = last {
                        print_growth(&mut shown, &content);
                    }
                    println!();
                    if outcome == TurnOutcome::Cancelled {
                        println!("{}", "(reply cancelled)".dimmed());
                    }
                    println!();
                    return;
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!("Renderer skipped {} events", skipped);
                }
                Err(RecvError::Closed) => return,
            }
        }
    }

    fn print_growth(shown: &mut String, content: &str) {
        match content.strip_prefix(shown.as_str()) {
            Some(suffix) => print!("{}", suffix),
            None => print!("\n{}", content),
        }
        let _ = std::io::stdout().flush();
        *shown = content.to_string();
    }

    fn print_sessions(engine: &ChatEngine) {
        let active = engine.active_session_id();
        let rows: Vec<_> = engine.store().read(|store| {
            store
                .sessions()
                .iter()
                .map(|s| (s.id.clone(), s.title.clone(), s.messages.len()))
                .collect()
        });

        println!();
        for (i, (id, title, count)) in rows.iter().enumerate() {
            let marker = if *id == active { "*" } else { " " };
            let status = match engine.persistence() {
                None => "".normal(),
                Some(p) if p.is_synced(id) => "saved".green(),
                Some(_) => "unsaved".yellow(),
            };
            println!(
                "{} {:>2}. {} ({} messages) {}",
                marker.cyan(),
                i + 1,
                title,
                count,
                status
            );
        }
        println!();
    }

    fn switch_session(engine: &ChatEngine, position: usize) {
        let target = engine
            .store()
            .read(|store| store.sessions().get(position - 1).map(|s| s.id.clone()));
        match target {
            Some(id) => {
                engine.select_session(&id);
                let title = engine
                    .store()
                    .snapshot(&id)
                    .map(|s| s.title)
                    .unwrap_or_default();
                println!("{}\n", format!("Switched to '{}'", title).green());
            }
            None => println!("{}\n", format!("No session number {}", position).yellow()),
        }
    }

    fn format_prompt(engine: &ChatEngine) -> String {
        let title = engine.store().read(|store| store.active_session().title.clone());
        format!("[{}] >> ", title.cyan())
    }

    fn print_welcome_banner(engine: &ChatEngine) {
        let sessions = engine.store().read(|store| store.len());
        println!("{}", "Chatwire interactive chat".bold());
        println!(
            "{} session(s). Type {} for commands, {} to leave.\n",
            sessions,
            "/help".cyan(),
            "/quit".cyan()
        );
    }
}
