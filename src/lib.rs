// Declare the modules
pub mod api;
pub mod chat;
pub mod commands;
pub mod config;
pub mod error;
pub mod image;
pub mod models;
pub mod prompts;
pub mod registry;
pub mod session;
pub mod state;
pub mod storage;
pub mod upload;

use anyhow::Context;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::api::{GeminiProvider, LLMApiProvider};
use crate::chat::ChatOutcome;
use crate::config::AppConfig;
use crate::models::{Message, Role};
use crate::registry::ConversationRegistry;
use crate::state::AppState;
use crate::storage::{ChatStore, InMemoryChatStore, SqliteChatStore};

const HELP: &str = "Commands:
  /new                  start a new conversation
  /list                 list conversations
  /load <n|id>          switch to a conversation from /list
  /image <path> [note]  get recipe ideas for a photo of your leftovers
  /show                 print the current conversation
  /quit                 exit
Anything else is sent to the assistant.";

/// Starts the interactive console front end. `--ephemeral` keeps chats in memory only,
/// `--store-key` saves an API key to the OS keyring and exits.
pub fn run() -> anyhow::Result<()> {
    // Initialize logging
    env_logger::init();

    let config = AppConfig::from_env()?;
    let ephemeral = std::env::args().any(|a| a == "--ephemeral");

    if std::env::args().any(|a| a == "--store-key") {
        println!("Paste the API key for {} and press enter:", config.model.name);
        let mut key = String::new();
        std::io::stdin()
            .read_line(&mut key)
            .context("Failed to read API key")?;
        crate::config::set_api_key_in_keyring(&config.model, key.trim())?;
        println!("API key stored. Set LEFTOVERAI_API_KEY_REF=keyring to use it.");
        return Ok(());
    }

    // Everything runs on one thread; exchanges interleave at their await points
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build async runtime")?;

    runtime.block_on(async move {
        let store: Arc<dyn ChatStore> = if ephemeral {
            log::info!("Using in-memory chat store");
            Arc::new(InMemoryChatStore::new())
        } else {
            Arc::new(SqliteChatStore::open(&config.db_path).await?)
        };
        let registry = ConversationRegistry::restore(store).await?;

        let api_key = crate::config::get_api_key(&config.model)?;
        let api_provider: Arc<dyn LLMApiProvider> =
            Arc::new(GeminiProvider::new(&config.model, api_key)?);

        let app_state = AppState::new(registry, api_provider, config.retry.clone());
        console_loop(app_state).await
    })
}

async fn console_loop(state: AppState) -> anyhow::Result<()> {
    println!("LeftoverAI - tell me what's in your fridge.\n{}", HELP);
    print_transcript(&commands::get_active_messages(&state).await);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut last_listing: Vec<models::ConversationId> = Vec::new();

    while let Some(line) = lines.next_line().await.context("Failed to read input")? {
        let line = line.trim();
        let (command, rest) = line.split_once(' ').unwrap_or((line, ""));
        match command {
            "" => {}
            "/quit" | "/exit" => break,
            "/help" => println!("{}", HELP),
            "/new" => {
                commands::new_chat(&state).await;
                println!("-- new conversation --");
            }
            "/show" => print_transcript(&commands::get_active_messages(&state).await),
            "/list" => {
                let summaries = commands::list_conversations(&state).await;
                last_listing = summaries.iter().map(|s| s.id).collect();
                for (i, s) in summaries.iter().enumerate() {
                    let marker = if s.active { "*" } else { " " };
                    println!("{}{:>3}. {} ({} messages)", marker, i + 1, s.title, s.message_count);
                }
            }
            "/load" => {
                let target = match rest.trim().parse::<usize>() {
                    Ok(n) if n >= 1 && n <= last_listing.len() => last_listing[n - 1].to_string(),
                    _ => rest.trim().to_string(),
                };
                match commands::load_chat(&state, &target).await {
                    Ok(true) => print_transcript(&commands::get_active_messages(&state).await),
                    Ok(false) => println!("No conversation with that id."),
                    Err(e) => println!("{}", e),
                }
            }
            "/image" => {
                let (path, note) = rest.trim().split_once(' ').unwrap_or((rest.trim(), ""));
                if path.is_empty() {
                    println!("Usage: /image <path> [note]");
                    continue;
                }
                let path = PathBuf::from(path);
                let note = Some(note.trim().to_string()).filter(|n| !n.is_empty());
                let background = state.clone();
                println!("Analyzing image... this may take up to 30 seconds. Keep chatting meanwhile.");
                // Runs in the background; the result is bound to the conversation active now
                tokio::spawn(async move {
                    match commands::upload_image_file(&background, &path, note).await {
                        Ok(report) => {
                            let active = background.registry.lock().await.active_id();
                            if report.conversation_id != active {
                                println!(
                                    "[image results saved to conversation {} after {} attempt(s)]",
                                    report.conversation_id, report.attempts
                                );
                            }
                            print_message(&report.message);
                        }
                        Err(e) => println!("{}", e),
                    }
                });
            }
            _ => match commands::send_message(&state, line).await {
                ChatOutcome::Replied(m) | ChatOutcome::Failed(m) => print_message(&m),
                ChatOutcome::Ignored => {}
            },
        }
    }
    Ok(())
}

fn print_transcript(messages: &[Message]) {
    for message in messages {
        print_message(message);
    }
}

fn print_message(message: &Message) {
    let who = match message.role {
        Role::User => "you",
        Role::Model => "chef",
    };
    let image = if message.image_ref.is_some() { " [image]" } else { "" };
    println!("{}{}: {}", who, image, message.text());
}
