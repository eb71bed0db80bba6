//! Terminal chat client for the Aurora reply server.
//! Run with: cargo run --bin aurora

use std::sync::{Arc, Mutex};

use anyhow::{Context, Result, bail};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use aurora_chat::chat::{
    ChatConfig, ConversationId, HttpReplyEndpoint, Notification, PersistentStore, Presenter,
    SessionController, SessionSnapshot, SlotKeys, SqliteSlots,
};

const HELP: &str = "\
Commands:
  /new         start a new conversation
  /list        list conversations
  /open <n>    switch to conversation n
  /delete <n>  delete conversation n
  /clear       delete every conversation
  /theme       toggle light/dark
  /quit        exit
Anything else is sent as a message.";

/// Prints transcript changes to stdout.
///
/// Keeps track of what was already printed so each render only shows the
/// messages that are new for the active conversation.
#[derive(Default)]
struct TerminalPresenter {
    shown: Mutex<Option<(ConversationId, usize)>>,
}

impl Presenter for TerminalPresenter {
    fn render(&self, snapshot: &SessionSnapshot) {
        let Ok(mut shown) = self.shown.lock() else {
            return;
        };
        let start = match shown.as_ref() {
            Some((id, count))
                if *id == snapshot.active_id && *count <= snapshot.transcript.len() =>
            {
                *count
            }
            _ => {
                println!("\n== {} ==", snapshot.active_title);
                0
            }
        };
        for message in &snapshot.transcript[start..] {
            println!("[{}] {}", message.role, message.text);
        }
        *shown = Some((snapshot.active_id.clone(), snapshot.transcript.len()));
    }

    fn notify(&self, notification: Notification) {
        eprintln!("* {notification}");
    }

    fn set_awaiting(&self, _conversation: &ConversationId, awaiting: bool) {
        if awaiting {
            println!("...");
        }
    }

    fn reset_input(&self) {}
}

fn print_list(snapshot: &SessionSnapshot) {
    for (index, summary) in snapshot.conversations.iter().enumerate() {
        let marker = if summary.id == snapshot.active_id { '*' } else { ' ' };
        println!(
            "{marker} {:>2}. {} ({} messages) {}",
            index + 1,
            summary.title,
            summary.message_count,
            summary.preview
        );
    }
}

/// Resolve a 1-based sidebar index.
fn conversation_at(snapshot: &SessionSnapshot, arg: &str) -> Result<ConversationId> {
    let index: usize = arg
        .trim()
        .parse()
        .with_context(|| format!("not a conversation number: {arg:?}"))?;
    match index.checked_sub(1).and_then(|i| snapshot.conversations.get(i)) {
        Some(summary) => Ok(summary.id.clone()),
        None => bail!("no conversation number {index}"),
    }
}

/// `RUST_LOG` directives when set and valid, `info` otherwise.
fn log_filter(directives: Option<&str>) -> EnvFilter {
    directives
        .and_then(|d| EnvFilter::try_new(d).ok())
        .unwrap_or_else(|| EnvFilter::new("info"))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(log_filter(std::env::var("RUST_LOG").ok().as_deref()))
        .init();

    let config = ChatConfig::from_env();
    config.validate()?;

    let slots = SqliteSlots::open(&config.storage)
        .await
        .with_context(|| format!("opening {}", config.storage.sqlite_path.display()))?;
    let store = PersistentStore::new(Arc::new(slots), SlotKeys::for_namespace(&config.namespace));
    let endpoint = HttpReplyEndpoint::new(&config)?;
    tracing::info!(endpoint = %endpoint.url(), "using reply endpoint");

    let controller =
        SessionController::start(store, Arc::new(endpoint), Arc::new(TerminalPresenter::default()))
            .await;
    println!("Theme: {}. Type /help for commands.", controller.theme().await);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        let (command, arg) = line.split_once(' ').unwrap_or((line, ""));

        match command {
            "" => {}
            "/quit" | "/exit" => break,
            "/help" => println!("{HELP}"),
            "/new" => {
                controller.new_conversation().await;
            }
            "/list" => print_list(&controller.snapshot().await?),
            "/open" | "/delete" => {
                let id = match conversation_at(&controller.snapshot().await?, arg) {
                    Ok(id) => id,
                    Err(err) => {
                        eprintln!("* {err}");
                        continue;
                    }
                };
                // Failures are already reported through the presenter.
                let _ = if command == "/open" {
                    controller.select_conversation(&id).await
                } else {
                    controller.delete_conversation(&id).await
                };
            }
            "/clear" => {
                println!("{} [y/N]", aurora_chat::chat::session::CLEAR_ALL_PROMPT);
                let answer = lines.next_line().await?.unwrap_or_default();
                let confirmed = matches!(answer.trim(), "y" | "Y" | "yes");
                controller.clear_all(|_| confirmed).await;
            }
            "/theme" => println!("Theme: {}", controller.toggle_theme().await),
            _ if command.starts_with('/') => eprintln!("* unknown command {command}, try /help"),
            _ => {
                if let Err(err) = controller.send(line).await {
                    eprintln!("* {err}");
                }
            }
        }
    }

    let pending = controller.exchange().in_flight();
    if pending > 0 {
        tracing::warn!(pending, "exiting with replies still in flight");
    }
    Ok(())
}
