//! Interactive chat.
//!
//! rustyline blocks, so it lives on its own thread and hands lines over a
//! channel. The async side waits for either a line or a nudge from the
//! attention loop, and tells the reader thread when to prompt again.

use anyhow::Result;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

use kindred_core::Responder;
use kindred_limbic::{AttentionLoop, Nudge};
use kindred_memory::{CompanionCoordinator, MaintenanceScheduler};

use crate::commands;

enum Input {
    Line(String),
    Done,
}

#[derive(Debug, PartialEq, Eq)]
enum SlashCommand {
    Status,
    Reflect,
    Help,
    Quit,
    Unknown(String),
}

fn parse_slash(line: &str) -> Option<SlashCommand> {
    let cmd = line.strip_prefix('/')?;
    Some(match cmd.trim().to_lowercase().as_str() {
        "status" => SlashCommand::Status,
        "reflect" => SlashCommand::Reflect,
        "help" | "?" => SlashCommand::Help,
        "quit" | "exit" | "q" => SlashCommand::Quit,
        other => SlashCommand::Unknown(other.to_string()),
    })
}

fn history_path() -> Option<PathBuf> {
    dirs::data_local_dir().map(|d| d.join("kindred").join("history.txt"))
}

/// Reader thread: prompt, send the line, wait for `ready` before prompting again.
fn spawn_reader(lines: mpsc::Sender<Input>, ready: std::sync::mpsc::Receiver<()>) {
    std::thread::spawn(move || {
        let mut editor = match DefaultEditor::new() {
            Ok(editor) => editor,
            Err(e) => {
                tracing::error!("Cannot open the line editor: {}", e);
                let _ = lines.blocking_send(Input::Done);
                return;
            }
        };
        let history = history_path();
        if let Some(path) = &history {
            let _ = editor.load_history(path);
        }

        while ready.recv().is_ok() {
            match editor.readline("> ") {
                Ok(line) => {
                    if !line.trim().is_empty() {
                        let _ = editor.add_history_entry(line.as_str());
                    }
                    if lines.blocking_send(Input::Line(line)).is_err() {
                        break;
                    }
                }
                Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => {
                    let _ = lines.blocking_send(Input::Done);
                    break;
                }
                Err(e) => {
                    tracing::error!("Readline failed: {}", e);
                    let _ = lines.blocking_send(Input::Done);
                    break;
                }
            }
        }

        if let Some(path) = &history {
            if let Some(parent) = path.parent() {
                let _ = std::fs::create_dir_all(parent);
            }
            if let Err(e) = editor.save_history(path) {
                tracing::debug!("Could not save history: {}", e);
            }
        }
    });
}

pub async fn run(
    coordinator: Arc<CompanionCoordinator>,
    attention: Arc<AttentionLoop>,
    responder: Arc<dyn Responder>,
) -> Result<()> {
    let name = coordinator.config().persona.name.clone();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let scheduler = Arc::new(MaintenanceScheduler::new(
        coordinator.decay().clone(),
        coordinator.consolidation().clone(),
        Duration::from_secs(coordinator.config().scheduler.tick_secs.max(1)),
    ));
    let scheduler_handle = scheduler.spawn(shutdown_rx.clone());

    let (nudge_tx, mut nudge_rx) = mpsc::channel::<Nudge>(8);
    let attention_handle = attention.spawn(coordinator.subscribe(), nudge_tx, shutdown_rx);

    let (line_tx, mut line_rx) = mpsc::channel::<Input>(1);
    let (ready_tx, ready_rx) = std::sync::mpsc::channel::<()>();
    spawn_reader(line_tx, ready_rx);

    println!("{} is here. Type /help for commands, /quit to leave.", name);
    let _ = ready_tx.send(());

    loop {
        tokio::select! {
            input = line_rx.recv() => {
                let line = match input {
                    Some(Input::Line(line)) => line,
                    Some(Input::Done) | None => break,
                };
                let text = line.trim();
                if text.is_empty() {
                    let _ = ready_tx.send(());
                    continue;
                }
                match parse_slash(text) {
                    Some(SlashCommand::Quit) => break,
                    Some(SlashCommand::Status) => {
                        if let Err(e) = commands::status(&coordinator, false).await {
                            println!("[status unavailable: {:#}]", e);
                        }
                    }
                    Some(SlashCommand::Reflect) => {
                        let reflection = coordinator.reflect().await;
                        println!("{} (thinking): {}", name, reflection);
                    }
                    Some(SlashCommand::Help) => {
                        println!("/status  show mood, relationship and sessions");
                        println!("/reflect ask {} how they feel", name);
                        println!("/quit    leave");
                    }
                    Some(SlashCommand::Unknown(cmd)) => {
                        println!("Unknown command /{}. Try /help.", cmd)
                    }
                    None => match coordinator.process_turn(text, responder.as_ref()).await {
                        Ok(report) => {
                            println!("\n{}: {}\n", name, report.reply);
                            if report.growth.level_up {
                                println!("[level up: now level {}]", report.growth.current_level);
                            }
                        }
                        Err(e) => {
                            tracing::error!("Turn failed: {:#}", e);
                            println!("\n[{} could not answer: {:#}]\n", name, e);
                        }
                    },
                }
                let _ = ready_tx.send(());
            }
            Some(nudge) = nudge_rx.recv() => {
                println!("\n{}: {}", name, nudge.text);
                if let Err(e) = coordinator.record_proactive(&nudge.text).await {
                    tracing::warn!("Failed to record proactive message: {:#}", e);
                }
            }
        }
    }

    drop(ready_tx);
    let _ = shutdown_tx.send(true);
    for (label, handle) in [("scheduler", scheduler_handle), ("attention", attention_handle)] {
        if let Err(e) = handle.await {
            tracing::warn!("{} task ended abnormally: {}", label, e);
        }
    }
    println!("Bye.");
    Ok(())
}
