//! Radio Monarca CLI - offline cache control and live chat from the terminal.

use std::io;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use monarca_core::api::ApiClient;
use monarca_core::chat::{self, Change, ChatClient, ChatMessage, RealtimeOptions};
use monarca_core::offline::{
    self, AssetRequest, CacheStorage, ControlMessage, DiskStorage, HttpFetcher, OfflineCache,
    Routed,
};
use monarca_core::prefs::{Language, Preferences, Theme};
use monarca_core::utils::truncate_string;
use monarca_core::Config;

// ============================================================================
// Constants
// ============================================================================

/// Subdirectory of the cache dir holding cache generations
const OFFLINE_DIR: &str = "offline";

const LOG_FILE: &str = "monarca.log";

/// Buffer size for realtime events waiting on the chat loop
const EVENT_BUFFER_SIZE: usize = 256;

/// How often pending sends are checked for a missing echo
const TICK_INTERVAL_SECS: u64 = 1;

/// Nicknames wider than this are shortened in the chat view
const NICKNAME_WIDTH: usize = 16;

#[derive(Parser, Debug)]
#[command(name = "monarca")]
#[command(about = "Radio Monarca from the terminal: offline cache and live chat")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Manage the offline asset cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
    /// Join the live chat
    Chat,
    /// Set the chat nickname
    Nick { name: String },
    /// Write the effective configuration (file plus environment) to disk
    Config,
    /// Show or change preferences
    Prefs {
        /// Interface language (es, en)
        #[arg(long)]
        language: Option<String>,
        /// Color theme (dark, light)
        #[arg(long)]
        theme: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
enum CacheAction {
    /// Precache the asset bundle for the configured version
    Install,
    /// Activate the installed version and drop older ones
    Activate,
    /// List cache generations
    List,
    /// Route one request through the cache
    Fetch { url: String },
}

/// Initialize the tracing subscriber for logging.
///
/// The chat view owns the terminal, so it logs to a file instead of stderr.
/// Keep the returned guard alive until exit or buffered lines are lost.
fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let appender = log_dir.and_then(|dir| {
        std::fs::create_dir_all(dir).ok()?;
        RollingFileAppender::builder()
            .rotation(Rotation::NEVER)
            .filename_prefix(LOG_FILE)
            .build(dir)
            .ok()
    });

    match appender {
        Some(appender) => {
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(fmt::layer().with_writer(writer).with_ansi(false))
                .with(filter)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry()
                .with(fmt::layer().with_writer(io::stderr))
                .with(filter)
                .init();
            None
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let config = Config::load()?;

    let log_dir = match cli.command {
        Command::Chat => config.cache_dir().ok(),
        _ => None,
    };
    let _guard = init_tracing(log_dir.as_deref());
    info!("Radio Monarca starting");

    match cli.command {
        Command::Cache { action } => run_cache(&config, action).await,
        Command::Chat => run_chat(&config).await,
        Command::Config => {
            config.save()?;
            println!("Configuration written to {}", Config::config_path()?.display());
            Ok(())
        }
        Command::Nick { name } => {
            let mut prefs = open_preferences()?;
            let nickname = prefs.set_nickname(&name)?;
            println!("Nickname set to {}", nickname);
            Ok(())
        }
        Command::Prefs { language, theme } => {
            let mut prefs = open_preferences()?;
            if let Some(language) = language {
                prefs.set_language(language.parse::<Language>()?)?;
            }
            if let Some(theme) = theme {
                prefs.set_theme(theme.parse::<Theme>()?)?;
            }
            println!("nickname: {}", prefs.nickname());
            println!("language: {}", prefs.language());
            println!("theme:    {}", prefs.theme());
            Ok(())
        }
    }
}

fn open_preferences() -> Result<Preferences> {
    Preferences::open(&Config::config_dir()?)
}

// ============================================================================
// Offline cache
// ============================================================================

async fn run_cache(config: &Config, action: CacheAction) -> Result<()> {
    let root = config.cache_dir()?.join(OFFLINE_DIR);
    let storage = DiskStorage::new(root).context("Failed to open offline cache")?;
    let cache = OfflineCache::new(&config.offline, storage, HttpFetcher::new()?)?;

    if let CacheAction::List = action {
        return list_generations(&cache);
    }

    let installed = cache.resume()?;
    let origin = cache.origin().clone();
    let (worker, task) = offline::worker::spawn(cache);

    match action {
        CacheAction::Install if installed => {
            let evicted = worker.activate().await?;
            println!("{} is already installed", config.offline.version);
            print_evicted(&evicted);
        }
        CacheAction::Install => {
            let outcome = worker.install().await?;
            println!("Installed {}", config.offline.version);
            if outcome.activated {
                print_evicted(&outcome.evicted);
            }
        }
        CacheAction::Activate => {
            if !installed {
                anyhow::bail!(
                    "Version {} is not installed. Run `monarca cache install` first.",
                    config.offline.version
                );
            }
            let evicted = worker.activate().await?;
            println!("Activated {}", config.offline.version);
            print_evicted(&evicted);
        }
        CacheAction::Fetch { url } => {
            if installed {
                worker.post_message(ControlMessage::SkipWaiting).await?;
            } else {
                worker.install().await?;
            }

            let url = origin.join(&url).with_context(|| format!("Invalid URL: {}", url))?;
            match worker.fetch(AssetRequest::get(url.clone())).await? {
                Routed::Bypass => println!("{} bypassed (not handled by the offline cache)", url),
                Routed::Response(response) => {
                    let age = response
                        .cached_at
                        .map(|at| format!(", cached {}", at.format("%Y-%m-%d %H:%M UTC")))
                        .unwrap_or_default();
                    println!(
                        "{} {} from {:?}, {} bytes, {}{}",
                        response.status,
                        url,
                        response.source,
                        response.body.len(),
                        response.content_type.as_deref().unwrap_or("unknown type"),
                        age
                    );
                }
            }
        }
        CacheAction::List => {}
    }

    // Dropping the handle stops the worker once background revalidations settle
    drop(worker);
    task.await?;
    Ok(())
}

fn list_generations<S: CacheStorage, F: offline::Fetcher>(cache: &OfflineCache<S, F>) -> Result<()> {
    let generations = cache.storage().generations()?;
    if generations.is_empty() {
        println!("No cache generations");
        return Ok(());
    }
    for generation in generations {
        let marker = if generation == cache.version() { "*" } else { " " };
        let entries = cache.storage().keys(&generation)?.len();
        println!("{} {} ({} entries)", marker, generation, entries);
    }
    Ok(())
}

fn print_evicted(evicted: &[String]) {
    for name in evicted {
        println!("Removed old cache {}", name);
    }
}

// ============================================================================
// Chat
// ============================================================================

#[derive(Debug, PartialEq, Eq)]
enum Input<'a> {
    Quit,
    Nick(&'a str),
    Message(&'a str),
}

fn parse_input(line: &str) -> Input<'_> {
    let trimmed = line.trim();
    if trimmed == "/quit" {
        Input::Quit
    } else if trimmed == "/nick" {
        Input::Nick("")
    } else if let Some(name) = trimmed.strip_prefix("/nick ") {
        Input::Nick(name)
    } else {
        Input::Message(line)
    }
}

async fn run_chat(config: &Config) -> Result<()> {
    let api = ApiClient::new(&config.remote)?;
    let api = match api.sign_in_anonymously().await {
        Ok(token) => api.with_token(token),
        Err(e) => {
            warn!(error = %e, "Anonymous sign-in failed, using the public key");
            api
        }
    };

    // Subscribe before loading history; pushes wait in the channel until the load is applied
    let (events_tx, mut events) = mpsc::channel(EVENT_BUFFER_SIZE);
    let subscription = chat::subscribe(
        api.realtime_url()?,
        RealtimeOptions::from_config(&config.remote, &config.realtime),
        events_tx,
    );

    let mut client = ChatClient::with_preferences(api, open_preferences()?, &config.chat);
    let change = client.load_initial().await;
    render(&client, change);
    println!("-- chatting as {} (/nick <name>, /quit) --", client.nickname());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut ticker = tokio::time::interval(Duration::from_secs(TICK_INTERVAL_SECS));

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match parse_input(&line) {
                    Input::Quit => break,
                    Input::Nick(name) => {
                        let nickname = client.set_nickname(name)?;
                        println!("-- now chatting as {} --", nickname);
                    }
                    Input::Message(text) => {
                        let change = client.send(text).await;
                        render(&client, change);
                    }
                }
            }
            Some(event) = events.recv() => {
                let change = client.handle_realtime(event).await;
                render(&client, change);
            }
            _ = ticker.tick() => {
                let change = client.tick(Utc::now());
                render(&client, change);
            }
        }
    }

    subscription.unsubscribe().await;
    info!("Chat closed");
    Ok(())
}

fn render<S: monarca_core::api::MessageStore>(client: &ChatClient<S>, change: Change) {
    match change {
        Change::Unchanged => {}
        Change::Replaced => client.messages().iter().for_each(print_message),
        Change::Appended(added) => added.iter().for_each(print_message),
    }
}

fn print_message(message: &ChatMessage) {
    println!(
        "[{}] {}: {}",
        message.time,
        truncate_string(&message.nickname, NICKNAME_WIDTH),
        message.content
    );
}
