//! `postbox`: line-mode chat client.
//!
//! Reads commands from stdin and drives the delivery core. Configuration via
//! CLI flags, environment variables, or config file
//! (`~/.config/postbox/config.toml`).
//!
//! ```bash
//! # Talk to a local echo endpoint
//! cargo run --bin postbox-echo &
//! cargo run --bin postbox
//!
//! # Start offline; messages queue until /online
//! cargo run --bin postbox -- --offline --database /tmp/postbox.db
//! ```

use std::io;
use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing_appender::non_blocking::WorkerGuard;

use postbox::client::ChatClient;
use postbox::command::{self, Command, HELP};
use postbox::config::{CliArgs, ClientConfig};
use postbox::connectivity::ConnectivitySignal;
use postbox::delivery::{DeliveryState, MessageView, Notice, RetryOutcome};
use postbox::transport::socket::SocketTransport;
use postbox::transport::{Transport, TransportMode};
use postbox_store::{ChatId, Store};

type Client = ChatClient<SocketTransport>;

#[tokio::main]
async fn main() -> io::Result<()> {
    let cli = CliArgs::parse();

    // Load and resolve configuration (CLI args > env > config file > defaults).
    let config = match ClientConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Warning: failed to load configuration: {e}");
            ClientConfig::default()
        }
    };

    let _log_guard = init_logging(&cli.log_level, cli.log_file.as_deref());
    tracing::info!(endpoint = %config.endpoint_url, "postbox starting");

    let store = Store::open(&config.database_path).map_err(|e| {
        io::Error::other(format!(
            "cannot open database {}: {e}",
            config.database_path.display()
        ))
    })?;

    let transport = Arc::new(SocketTransport::new(config.to_socket_config()));
    if config.start_offline {
        transport.set_mode(TransportMode::SimulatedOffline).await;
    }

    let signal = ConnectivitySignal::new();
    let (client, notices) = ChatClient::new(
        store,
        Arc::clone(&transport),
        signal.subscribe(),
        config.to_client_options(),
    );
    client.start();
    signal.set(Some(!config.start_offline));

    println!("postbox: {} (type /help)", config.endpoint_url);
    let result = run_repl(&client, &signal, notices).await;

    client.shutdown().await;
    tracing::info!("postbox exiting");
    result
}

/// Initialize file-based logging.
///
/// Logs are written to a file, never stdout, which belongs to the REPL.
/// Returns a [`WorkerGuard`] that must be held until shutdown to ensure all
/// buffered log entries are flushed.
fn init_logging(level: &str, file_path: Option<&Path>) -> Option<WorkerGuard> {
    let default_path = std::env::temp_dir().join("postbox.log");
    let log_path = file_path.unwrap_or(&default_path);

    let log_dir = log_path.parent()?;
    let file_name = log_path.file_name()?.to_str()?;

    let file_appender = tracing_appender::rolling::never(log_dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter(env_filter)
        .with_ansi(false)
        .init();

    Some(guard)
}

/// Read commands until `/quit` or end of input, printing notices and
/// connection changes as they arrive.
async fn run_repl(
    client: &Client,
    signal: &ConnectivitySignal,
    mut notices: mpsc::Receiver<Notice>,
) -> io::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut connection = client.connection_state();
    let mut open: Option<ChatId> = None;

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    return Ok(());
                };
                match command::parse(&line) {
                    Ok(Some(Command::Quit)) => return Ok(()),
                    Ok(Some(cmd)) => {
                        if let Err(e) = execute(client, signal, &mut open, cmd).await {
                            println!("! {e}");
                        }
                    }
                    Ok(None) => {}
                    Err(e) => println!("! {e}"),
                }
            }
            Some(notice) = notices.recv() => {
                println!("! {notice}");
            }
            Ok(()) = connection.changed() => {
                let up = *connection.borrow_and_update();
                println!("* {}", if up { "connected" } else { "disconnected" });
            }
        }
    }
}

/// Run one command against the client.
async fn execute(
    client: &Client,
    signal: &ConnectivitySignal,
    open: &mut Option<ChatId>,
    cmd: Command,
) -> Result<(), Box<dyn std::error::Error>> {
    match cmd {
        Command::NewChat(name) => {
            let id = client.create_chat(&name)?;
            *open = Some(id);
            println!("created chat {id} ({name}), now open");
        }
        Command::Chats => {
            let chats = client.chats()?;
            if chats.is_empty() {
                println!("no chats");
            }
            for chat in chats {
                let marker = if Some(chat.id) == *open { '>' } else { ' ' };
                println!(
                    "{marker}{:>4}  {:<20} {:>3} unread  {}",
                    chat.id, chat.name, chat.unread_count, chat.last_message
                );
            }
        }
        Command::Open(id) => {
            let chat = client.coordinator().store().get_chat(id)?;
            *open = Some(id);
            println!("opened {} ({})", chat.id, chat.name);
            print_history(&client.messages(id)?);
        }
        Command::History => {
            print_history(&client.messages(require_open(*open)?)?);
        }
        Command::Read => client.mark_read(require_open(*open)?)?,
        Command::Retry => {
            let summary = client.retry_all().await?;
            println!(
                "retried {}: {} delivered, {} still pending",
                summary.attempted(),
                summary.delivered.len(),
                summary.still_pending
            );
        }
        Command::RetryOne(pending_id) => {
            match client.retry_one(require_open(*open)?, pending_id).await? {
                RetryOutcome::Delivered(id) => println!("delivered as message {id}"),
                RetryOutcome::StillPending => println!("still pending"),
                RetryOutcome::Skipped => println!("offline, not retried"),
                RetryOutcome::NotFound => println!("no pending message {pending_id} here"),
            }
        }
        Command::Discard(pending_id) => client.discard(pending_id)?,
        Command::Online => {
            client
                .coordinator()
                .transport()
                .set_mode(TransportMode::Live)
                .await;
            signal.set(Some(true));
        }
        Command::Offline => {
            client
                .coordinator()
                .transport()
                .set_mode(TransportMode::SimulatedOffline)
                .await;
            signal.set(Some(false));
        }
        Command::Clear => {
            client.clear_all()?;
            *open = None;
            println!("all chats deleted");
        }
        Command::Help => println!("{HELP}"),
        Command::Send(body) => {
            let chat = require_open(*open)?;
            if !client.send(chat, &body).await? {
                tracing::debug!(chat_id = %chat, "send not accepted by transport");
            }
        }
        Command::Quit => {}
    }
    Ok(())
}

fn require_open(open: Option<ChatId>) -> Result<ChatId, io::Error> {
    open.ok_or_else(|| io::Error::other("no chat open (use /open ID or /new NAME)"))
}

fn print_history(views: &[MessageView]) {
    if views.is_empty() {
        println!("(no messages)");
    }
    for view in views {
        let time = chrono::DateTime::from_timestamp_millis(view.timestamp).map_or_else(
            || "--:--".to_string(),
            |t| t.with_timezone(&chrono::Local).format("%H:%M").to_string(),
        );
        let tag = match view.state {
            DeliveryState::Delivered { unread: true, .. } => " *".to_string(),
            DeliveryState::Delivered { unread: false, .. } => String::new(),
            DeliveryState::Pending { id } => format!(" [pending {id}]"),
        };
        println!("{time} {}: {}{tag}", view.sender, view.body);
    }
}
