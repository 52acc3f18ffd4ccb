//! tether: operator CLI for a chat session gateway
//!
//! Thin wrapper over the client library: one-shot gateway calls plus a
//! `watch` mode that follows a session through the push stream.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

use tether::{
    Cadence, ClientConfig, EventStream, GatewayClient, SessionSync, StreamNotice, StreamOptions,
    SyncSettings, SyncUpdate,
};
use tether_types::{Message, StreamEvent};

#[derive(Parser)]
#[command(name = "tether")]
#[command(about = "Sync client for a chat session gateway")]
struct Args {
    /// Gateway base URL (overrides config file)
    #[arg(long, env = "TETHER_GATEWAY_URL")]
    url: Option<String>,

    /// Bearer token for the gateway (overrides config file)
    #[arg(long, env = "TETHER_GATEWAY_TOKEN")]
    token: Option<String>,

    /// Timing preset: standard or constrained (overrides config file)
    #[arg(long)]
    cadence: Option<Cadence>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Gateway liveness probe
    Health,
    /// Gateway status summary
    Status,
    /// Runtime metrics snapshot
    Metrics,
    /// Per-channel health
    Channels,
    /// List recent sessions
    Sessions {
        #[arg(long, default_value_t = 20)]
        limit: u32,
    },
    /// Show message history for one session
    History {
        session_key: String,
        #[arg(long, default_value_t = 100)]
        limit: u32,
    },
    /// Queue a message into an existing session
    Send {
        session_key: String,
        text: String,
        #[arg(long, default_value = "api.sessions")]
        channel: String,
    },
    /// Send a generic message (a fresh session unless --session-key is given)
    Message {
        text: String,
        #[arg(long)]
        session_key: Option<String>,
    },
    /// Trigger a gateway config reload
    Reload,
    /// Follow the push stream; with --session, keep that session in sync
    Watch {
        #[arg(long)]
        session: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let config = ClientConfig::load().context("Failed to load client config")?;
    let base_url = args.url.unwrap_or(config.base_url);
    let token = args.token.or(config.auth_token);
    let cadence = args.cadence.unwrap_or(config.cadence);

    let client = GatewayClient::new(&base_url, token);

    match args.command {
        Command::Health => {
            let health = client.health().await?;
            println!("{} (v{})", health.status, health.version);
        }
        Command::Status => {
            let status = client.status().await?;
            println!("{} v{} (uptime {})", status.status, status.version, status.uptime);
        }
        Command::Metrics => {
            let metrics = client.metrics().await?;
            println!("uptime:       {}s", metrics.uptime_secs);
            println!("messages in:  {}", metrics.messages_in);
            println!("messages out: {}", metrics.messages_out);
            println!("tool calls:   {}", metrics.tool_calls);
            println!(
                "tokens:       {} in / {} out",
                metrics.tokens_input, metrics.tokens_output
            );
        }
        Command::Channels => {
            let report = client.channel_health().await?;
            println!(
                "{:<14} {:<28} {:<10} {:>8} {:>9} {:>8}",
                "CHANNEL", "STATUS", "STABILITY", "IN(1H)", "OUT(1H)", "ERR(1H)"
            );
            for ch in &report.channels {
                println!(
                    "{:<14} {:<28} {:<10} {:>8} {:>9} {:>8}",
                    ch.channel,
                    ch.status,
                    ch.trend_1h.stability,
                    ch.trend_1h.inbound_count,
                    ch.trend_1h.outbound_count,
                    ch.trend_1h.error_count
                );
            }
            println!(
                "{} configured, {} natively supported",
                report.configured_count, report.native_supported_count
            );
        }
        Command::Sessions { limit } => {
            let sessions = client.list_sessions(limit).await?;
            if sessions.is_empty() {
                println!("No sessions.");
                return Ok(());
            }
            println!("{:<40} {:>8}  {}", "SESSION", "MSGS", "UPDATED");
            for session in &sessions {
                println!(
                    "{:<40} {:>8}  {}",
                    session.session_key, session.message_count, session.updated_at
                );
            }
        }
        Command::History { session_key, limit } => {
            let messages = client.session_messages(&session_key, limit).await?;
            for message in &messages {
                print_message(message);
            }
        }
        Command::Send {
            session_key,
            text,
            channel,
        } => {
            let receipt = client
                .send_session_message(&session_key, &text, &channel)
                .await?;
            println!("{} ({})", receipt.status, receipt.session_key);
        }
        Command::Message { text, session_key } => {
            let receipt = client.send_message(&text, session_key.as_deref()).await?;
            println!("{} (id {})", receipt.status, receipt.id);
        }
        Command::Reload => {
            let receipt = client.reload().await?;
            println!("{}", receipt.status);
        }
        Command::Watch { session } => match session {
            Some(session_key) => watch_session(client, cadence, session_key).await?,
            None => watch_events(&base_url, client.auth_token()).await?,
        },
    }

    Ok(())
}

/// Follow one session: print its history, then keep it synchronized.
async fn watch_session(client: GatewayClient, cadence: Cadence, session_key: String) -> Result<()> {
    let history = client
        .session_messages(&session_key, 100)
        .await
        .with_context(|| format!("Failed to fetch history for '{}'", session_key))?;
    for message in &history {
        print_message(message);
    }

    let (sync, mut updates) = SessionSync::spawn(client, SyncSettings::new(cadence.profile()));
    sync.select_session(Some(session_key.clone()));
    sync.start_streaming();

    println!("--- watching {} (Ctrl+C to exit) ---", session_key);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                sync.stop_streaming("interrupted by user");
                break;
            }
            update = updates.recv() => match update {
                Some(SyncUpdate::StreamLive) => println!("--- stream live ---"),
                Some(SyncUpdate::StreamDown { reason, retry_in: Some(delay) }) => {
                    println!("--- stream down ({reason}), retrying in {}ms ---", delay.as_millis());
                }
                Some(SyncUpdate::StreamDown { reason, retry_in: None }) => {
                    println!("--- stream stopped ({reason}) ---");
                    break;
                }
                Some(SyncUpdate::Message(message)) => print_message(&message),
                Some(SyncUpdate::Reconciled { messages, .. }) => {
                    println!("--- reconciled: {} messages on record ---", messages.len());
                }
                Some(SyncUpdate::ReconcileFailed { error, .. }) => {
                    println!("--- reconcile failed: {error} ---");
                }
                None => break,
            },
        }
    }

    Ok(())
}

/// Raw event firehose across all sessions, heartbeats included.
async fn watch_events(base_url: &str, auth_token: Option<&str>) -> Result<()> {
    let options = StreamOptions {
        include_heartbeats: true,
    };
    let mut stream = EventStream::connect(base_url, auth_token, options)
        .await
        .context("Failed to open event stream")?;

    println!("--- event stream open (Ctrl+C to exit) ---");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                stream.stop().await;
                break;
            }
            notice = stream.next() => match notice {
                Some(StreamNotice::Event(event)) => print_event(&event),
                Some(StreamNotice::Closed { reason }) => {
                    println!("--- closed: {} ---", reason.unwrap_or_else(|| "by gateway".to_string()));
                    break;
                }
                Some(StreamNotice::Failed { error }) => {
                    println!("--- failed: {error} ---");
                    break;
                }
                None => break,
            },
        }
    }

    Ok(())
}

fn print_message(message: &Message) {
    let prefix = match message.role {
        tether_types::Role::User => ">",
        tether_types::Role::Assistant => "<",
        tether_types::Role::System => "[sys]",
        tether_types::Role::Tool => "[tool]",
    };
    println!("{} {}: {}", prefix, message.sender_id, message.content);
}

fn print_event(event: &StreamEvent) {
    match event {
        StreamEvent::Connected { .. } => println!("connected"),
        StreamEvent::Heartbeat { metrics } => match metrics {
            Some(m) => println!("heartbeat ({} in / {} out)", m.messages_in, m.messages_out),
            None => println!("heartbeat"),
        },
        StreamEvent::InboundMessage { message } | StreamEvent::OutboundMessage { message } => {
            print!("[{}] ", message.session_key);
            print_message(message);
        }
        StreamEvent::SystemLog { level, message } => println!("log [{level}]: {message}"),
        StreamEvent::Lagged { skipped } => println!("lagged: {skipped} events dropped"),
        StreamEvent::Error { message } => println!("frame error: {message}"),
    }
}
