//! `Psst`: anonymous end-to-end encrypted chat for two.
//!
//! Starts a new room and prints its share link, or joins an existing one.
//! Type a line to send it; `/leave` or end of input quits. Configuration via
//! CLI flags, environment variables, or config file
//! (`~/.config/psst/config.toml`).
//!
//! ```bash
//! # Start a room
//! cargo run --bin psst -- --relay-url ws://127.0.0.1:9000/ws
//!
//! # Join from a share link
//! cargo run --bin psst -- --join 'http://localhost:8080/#abc123'
//! ```

use std::path::Path;
use std::process::ExitCode;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_appender::non_blocking::WorkerGuard;

use psst::config::{CliArgs, ClientConfig};
use psst::crypto::has_crypto_support;
use psst::link::{parse_room, share_link};
use psst::session::{ChatSession, CloseReason, SessionError, SessionEvent};
use psst::transport::ws::WsChannel;
use psst_proto::room::RoomId;

const LEAVE_COMMAND: &str = "/leave";

#[tokio::main]
async fn main() -> ExitCode {
    let cli = CliArgs::parse();

    let config = match ClientConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Warning: failed to load config file: {e}");
            ClientConfig {
                join: cli.join.clone(),
                ..ClientConfig::default()
            }
        }
    };

    let _log_guard = init_logging(&cli.log_level, cli.log_file.as_deref());
    tracing::info!("psst starting");

    if !has_crypto_support() {
        println!("* encryption is not available on this system; nothing was sent");
        return ExitCode::FAILURE;
    }

    let room = match config.join.as_deref() {
        Some(input) => match parse_room(input) {
            Ok(room) => room,
            Err(e) => {
                eprintln!("* cannot join: {e}");
                return ExitCode::FAILURE;
            }
        },
        None => {
            let room = RoomId::generate();
            match share_link(&config.origin, &room) {
                Ok(link) => println!("* share this link with your partner: {link}"),
                Err(e) => {
                    tracing::warn!(error = %e, "could not build share link");
                    println!("* share this room id with your partner: {room}");
                }
            }
            room
        }
    };

    let code = run(&config, &room).await;
    tracing::info!("psst exiting");
    code
}

/// Generate keys, join `room`, and relay lines between stdin and the partner.
async fn run(config: &ClientConfig, room: &RoomId) -> ExitCode {
    let mut session: ChatSession<WsChannel> = ChatSession::new();

    println!("* generating keys...");
    if let Err(e) = session.generate_keys(true).await {
        println!("* {e}");
        return ExitCode::FAILURE;
    }

    let channel = match WsChannel::open(&config.relay_url, room, &config.channel_config()).await {
        Ok(channel) => channel,
        Err(e) => {
            println!("* could not join room: {e}");
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = session.attach(channel).await {
        println!("* {e}");
        return ExitCode::FAILURE;
    }
    println!("* waiting for partner (room {room})");

    // Stdin is line-buffered, so keystrokes are never seen before Enter and
    // this client sends no typing notices. It still shows the partner's.
    let mut partner_typing = false;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!(error = %e, "stdin read failed");
                        break;
                    }
                };
                let text = line.trim_end_matches(['\r', '\n']);
                if text.trim() == LEAVE_COMMAND {
                    break;
                }
                if text.is_empty() {
                    continue;
                }
                match session.send_text(text).await {
                    Ok(()) => {}
                    Err(SessionError::NotReady) => {
                        println!("* partner has not joined yet; message not sent");
                    }
                    Err(SessionError::Closed) => return ExitCode::SUCCESS,
                    Err(e) => println!("* message not sent: {e}"),
                }
            }
            inbound = session.recv() => {
                if let Some(event) = session.handle(inbound).await {
                    if event == SessionEvent::Typing {
                        if !partner_typing {
                            println!("* partner is typing...");
                        }
                        partner_typing = true;
                        continue;
                    }
                    partner_typing = false;
                    let closed = matches!(event, SessionEvent::Closed(_));
                    print_event(&event);
                    if closed {
                        return ExitCode::SUCCESS;
                    }
                }
            }
        }
    }

    session.leave().await;
    ExitCode::SUCCESS
}

fn print_event(event: &SessionEvent) {
    match event {
        SessionEvent::HandshakeComplete { fingerprint } => {
            println!("* secure channel established (partner key {fingerprint})");
        }
        SessionEvent::Message { text } => println!("partner: {text}"),
        SessionEvent::Typing => println!("* partner is typing..."),
        SessionEvent::Undecryptable => println!("* [undecryptable message]"),
        SessionEvent::KeyRejected { error } => {
            println!("* partner sent an unusable key: {error}");
        }
        SessionEvent::Rejected(reason) => println!("* relay dropped a message: {reason}"),
        SessionEvent::Closed(CloseReason::ConnectionLost | CloseReason::DeadPeer) => {
            println!("* connection lost");
        }
        SessionEvent::Closed(reason) => println!("* {reason}"),
    }
}

/// Initialize file-based logging.
///
/// Logs are written to a file so stdout carries only the conversation.
/// Returns a [`WorkerGuard`] that must be held until shutdown to ensure all
/// buffered log entries are flushed.
fn init_logging(level: &str, file_path: Option<&Path>) -> Option<WorkerGuard> {
    let default_path = std::env::temp_dir().join("psst.log");
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
