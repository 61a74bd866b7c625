use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use research_chat::api::{ChatStreamSource, DocumentFormat, HttpChatSource};
use research_chat::models::{InterruptOption, MessageRole};
use research_chat::replay::ReplaySource;
use research_chat::service::{ChatService, DocumentService, Notification, RetryTurn, SendOptions};
use research_chat::settings::{FileSettingsStore, MemorySettingsStore, SettingsStore};
use research_chat::store::{ConversationState, ConversationStore};
use research_chat::{AppError, ClientConfig};

const USAGE: &str = "usage: research_chat [--replay <transcript>] [--export pdf|md] <question>";
const REPLAY_DELAY: Duration = Duration::from_millis(40);

struct CliArgs {
    question: String,
    replay: Option<PathBuf>,
    export: Option<DocumentFormat>,
}

impl CliArgs {
    fn parse(mut args: impl Iterator<Item = String>) -> anyhow::Result<Self> {
        let mut words = Vec::new();
        let mut replay = None;
        let mut export = None;
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--replay" => replay = Some(PathBuf::from(args.next().context(USAGE)?)),
                "--export" => export = Some(args.next().context(USAGE)?.parse::<DocumentFormat>()?),
                "-h" | "--help" => bail!(USAGE),
                _ => words.push(arg),
            }
        }
        if words.is_empty() {
            bail!(USAGE);
        }
        Ok(Self { question: words.join(" "), replay, export })
    }
}

/// What the terminal does after a turn settles.
enum NextTurn {
    Send { content: String, feedback: String },
    Retry(RetryTurn),
    Done,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present (development convenience)
    dotenvy::dotenv().ok();

    // Logs go to stderr so they do not interleave with the streamed answer
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "research_chat=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = CliArgs::parse(std::env::args().skip(1))?;

    // ── Dependency wiring ─────────────────────────────────────────────────────
    let config = ClientConfig::from_env()?;
    let settings: Arc<dyn SettingsStore> = match &config.settings_path {
        Some(path) => Arc::new(FileSettingsStore::load(path)?),
        None => Arc::new(MemorySettingsStore::default()),
    };
    let client = reqwest::Client::builder().build()?;
    let source: Arc<dyn ChatStreamSource> = match &args.replay {
        Some(path) => Arc::new(ReplaySource::from_file(path).await?.with_delay(REPLAY_DELAY)),
        None => Arc::new(HttpChatSource::new(client.clone(), &config)?),
    };

    let store = ConversationStore::with_random_thread();
    let (notify_tx, mut notify_rx) = mpsc::unbounded_channel::<Notification>();
    let chat = ChatService::new(
        store.clone(),
        source,
        settings,
        Arc::new(notify_tx),
        config.turn_retry,
    );
    let documents = DocumentService::new(client, config.clone(), store.clone());
    info!(thread_id = %store.thread_id(), api = %config.api_url, "Research chat ready");

    // ── Cancellation ──────────────────────────────────────────────────────────
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, cancelling the current turn");
                cancel.cancel();
            }
        });
    }

    // ── Conversation loop ─────────────────────────────────────────────────────
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut updates = store.subscribe();
    let mut printer = Printer::default();
    let mut next = NextTurn::Send { content: args.question.clone(), feedback: String::new() };

    loop {
        let turn = async {
            match &next {
                NextTurn::Send { content, feedback } => {
                    let options = SendOptions {
                        interrupt_feedback: Some(feedback.clone()).filter(|f| !f.is_empty()),
                    };
                    chat.send(Some(content.as_str()), options, cancel.clone()).await
                }
                NextTurn::Retry(turn) => chat.retry(turn, cancel.clone()).await,
                NextTurn::Done => Ok(()),
            }
        };
        let result = follow(turn, &mut updates, &mut printer).await;
        println!();

        next = match result {
            Err(err) if err.is_cancelled() => break,
            Err(_) => match notify_rx.try_recv() {
                Ok(notification) => offer_retry(notification, &mut stdin).await?,
                Err(_) => NextTurn::Done,
            },
            Ok(()) => match store.read(pending_options) {
                Some(options) => choose_option(&options, &mut stdin).await?,
                None => NextTurn::Done,
            },
        };
        if matches!(next, NextTurn::Done) {
            break;
        }
    }

    // ── Export ────────────────────────────────────────────────────────────────
    if let Some(format) = args.export {
        let research_id = store.read(|state| state.research_ids().last().cloned());
        match research_id {
            Some(research_id) => {
                let path = documents.download_research(&research_id, format).await?;
                println!("Saved {} to {}", format.label(), path.display());
            }
            None => println!("No research to export."),
        }
    }

    Ok(())
}

/// Drives `turn` to completion while echoing store changes.
async fn follow(
    turn: impl std::future::Future<Output = Result<(), AppError>>,
    updates: &mut watch::Receiver<ConversationState>,
    printer: &mut Printer,
) -> Result<(), AppError> {
    tokio::pin!(turn);
    let result = loop {
        tokio::select! {
            result = &mut turn => break result,
            changed = updates.changed() => {
                if changed.is_err() {
                    break (&mut turn).await;
                }
                printer.render(&updates.borrow_and_update());
            }
        }
    };
    printer.render(&updates.borrow_and_update());
    result
}

fn pending_options(state: &ConversationState) -> Option<Vec<InterruptOption>> {
    state
        .last_interrupt_message()
        .map(|message| message.options.clone())
        .filter(|options| !options.is_empty())
}

async fn choose_option(
    options: &[InterruptOption],
    stdin: &mut Lines<BufReader<Stdin>>,
) -> anyhow::Result<NextTurn> {
    for (index, option) in options.iter().enumerate() {
        println!("  {}) {}", index + 1, option.text);
    }
    print!("Choose an option (empty to stop): ");
    std::io::stdout().flush()?;

    let Some(line) = stdin.next_line().await? else {
        return Ok(NextTurn::Done);
    };
    let choice = line.trim();
    if choice.is_empty() {
        return Ok(NextTurn::Done);
    }
    let option = choice
        .parse::<usize>()
        .ok()
        .and_then(|n| n.checked_sub(1))
        .and_then(|n| options.get(n))
        .or_else(|| options.iter().find(|o| o.value == choice));
    Ok(match option {
        Some(option) => NextTurn::Send {
            content: option.text.clone(),
            feedback: option.value.clone(),
        },
        None => {
            println!("Unknown option '{choice}'.");
            NextTurn::Done
        }
    })
}

async fn offer_retry(
    notification: Notification,
    stdin: &mut Lines<BufReader<Stdin>>,
) -> anyhow::Result<NextTurn> {
    eprintln!("{}", notification.message);
    let Some(turn) = notification.retry else {
        return Ok(NextTurn::Done);
    };
    print!("Retry? [y/N] ");
    std::io::stdout().flush()?;
    let answer = stdin.next_line().await?.unwrap_or_default();
    Ok(if answer.trim().eq_ignore_ascii_case("y") {
        NextTurn::Retry(turn)
    } else {
        NextTurn::Done
    })
}

/// Prints streamed assistant output incrementally.
#[derive(Default)]
struct Printer {
    printed: HashMap<String, usize>,
    tool_calls: HashSet<String>,
    errors: HashSet<String>,
    researches: usize,
}

impl Printer {
    fn render(&mut self, state: &ConversationState) {
        let mut out = std::io::stdout().lock();

        for research_id in state.research_ids().iter().skip(self.researches) {
            let _ = writeln!(out, "\n== Research: {} ==", state.research_title(research_id));
        }
        self.researches = state.research_ids().len();

        for message in state.messages().filter(|m| m.role == MessageRole::Assistant) {
            let printed = self.printed.entry(message.id.clone()).or_insert_with(|| {
                let agent = message.agent.map(|a| a.as_str()).unwrap_or("assistant");
                let _ = writeln!(out, "\n[{agent}]");
                0
            });
            if message.content.len() > *printed {
                let _ = write!(out, "{}", &message.content[*printed..]);
                *printed = message.content.len();
            }
            for call in &message.tool_calls {
                if self.tool_calls.insert(call.id.clone()) {
                    let _ = writeln!(out, "\n  -> {}", call.name);
                }
            }
            if let Some(error) = &message.error {
                if self.errors.insert(message.id.clone()) {
                    let _ = writeln!(out, "\n  !! {error}");
                }
            }
        }
        let _ = out.flush();
    }
}
