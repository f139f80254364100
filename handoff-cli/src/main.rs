//! handoff-cli: customer widget and agent console for the Handoff HTTP API.
//!
//! Usage:
//!   handoff-cli request --email ann@example.com --name Ann
//!   handoff-cli send <session> "Is this in stock?" [--role agent] [--client-id c-1]
//!   handoff-cli pull <session> [--since 1700000000000]
//!   handoff-cli claim <session> --agent agent-1 [--agent-name Priya]
//!   handoff-cli end <session> [--by agent]
//!   handoff-cli sessions [--status waiting]
//!   handoff-cli chat --email ann@example.com [--name Ann]
//!   handoff-cli status
//!
//! Add `--json` to print the raw server response. `--config handoff.toml`
//! (or `HANDOFF_CONFIG`) takes poll and retry timing from its `[client]` table.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use handoff_core::config::ClientConfig;
use handoff_core::models::timestamp;
use handoff_core::sync::{push, ChatMode, ChatTransport, HttpTransport, SyncClient, SyncUpdate};
use handoff_core::wire::{SendMessageRequest, WireMessage};
use handoff_core::{EndedBy, Role, SessionStatus};

const DEFAULT_SERVER: &str = "http://127.0.0.1:8780";

#[derive(Parser)]
#[command(name = "handoff-cli", version, about = "Live-chat handoff client")]
struct Cli {
    /// Handoff HTTP API base URL
    #[arg(long, env = "HANDOFF_HTTP_URL", default_value = DEFAULT_SERVER, global = true)]
    server: String,

    /// Print raw JSON responses
    #[arg(long, global = true)]
    json: bool,

    /// Config file; only its `[client]` table is read
    #[arg(long, env = "HANDOFF_CONFIG", global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Open a live-agent session
    Request {
        #[arg(long)]
        email: String,
        #[arg(long)]
        name: Option<String>,
    },
    /// Send one message to a session
    Send {
        session: Uuid,
        content: String,
        /// user | agent | system
        #[arg(long, default_value = "user")]
        role: String,
        /// Idempotency key; retries with the same key store one message
        #[arg(long = "client-id")]
        client_id: Option<String>,
    },
    /// Fetch messages newer than a cursor
    Pull {
        session: Uuid,
        /// Cursor in epoch millis (seconds and RFC 3339 are accepted too)
        #[arg(long)]
        since: Option<String>,
    },
    /// Claim a waiting session as an agent
    Claim {
        session: Uuid,
        #[arg(long)]
        agent: String,
        #[arg(long = "agent-name")]
        agent_name: Option<String>,
    },
    /// End a session
    End {
        session: Uuid,
        /// customer | agent | system
        #[arg(long, default_value = "customer")]
        by: String,
    },
    /// List sessions, optionally filtered by status
    Sessions {
        #[arg(long)]
        status: Option<String>,
    },
    /// Interactive customer chat. Type `/end` to finish.
    Chat {
        #[arg(long)]
        email: String,
        #[arg(long)]
        name: Option<String>,
    },
    /// Show server health
    Status,
}

// ============================================================================
// Rendering
// ============================================================================

/// One printable line for a message: `[HH:MM:SS] role: content`.
fn format_message(message: &WireMessage) -> String {
    let clock = chrono::DateTime::from_timestamp_millis(message.timestamp)
        .map(|t| t.format("%H:%M:%S").to_string())
        .unwrap_or_else(|| "--:--:--".to_string());
    let who = match message.role {
        Role::User => "you",
        Role::Agent => "agent",
        Role::System => "*",
    };
    format!("[{}] {}: {}", clock, who, message.content)
}

/// Key under which a message counts as already printed. The optimistic echo
/// and the stored copy share a `clientMessageId`, so they print once.
fn render_key(message: &WireMessage) -> Option<String> {
    message
        .client_message_id
        .clone()
        .or_else(|| message.id.map(|id| id.to_string()))
}

/// Lines for messages not yet printed, in list order.
fn unseen_lines(printed: &mut HashSet<String>, messages: &[WireMessage]) -> Vec<String> {
    messages
        .iter()
        .filter(|m| match render_key(m) {
            Some(key) => printed.insert(key),
            None => true,
        })
        .map(format_message)
        .collect()
}

fn mode_banner(mode: ChatMode) -> &'static str {
    match mode {
        ChatMode::Bot => "-- back with the assistant --",
        ChatMode::Waiting => "-- waiting for an agent --",
        ChatMode::Connected => "-- connected to an agent --",
        ChatMode::Ended => "-- chat ended --",
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

// ============================================================================
// Commands
// ============================================================================

/// Server address plus the client timing every command shares.
struct Target {
    server: String,
    client: ClientConfig,
}

impl Target {
    fn from_cli(cli: &Cli) -> anyhow::Result<Self> {
        let client = match cli.config.as_deref() {
            Some(path) => ClientConfig::load(path)
                .with_context(|| format!("failed to load config from {}", path))?,
            None => ClientConfig::default(),
        };
        Ok(Self {
            server: cli.server.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn transport(&self) -> anyhow::Result<HttpTransport> {
        Ok(HttpTransport::new(&self.server, self.client.request_timeout())?)
    }
}

async fn do_request(target: &Target, email: &str, name: Option<&str>, json: bool) -> anyhow::Result<()> {
    let t = target.transport()?;
    let request = handoff_core::wire::RequestAgentRequest {
        customer_email: Some(email.to_string()),
        customer_name: name.map(str::to_string),
        ..Default::default()
    };
    let resp = t.request_live_agent(&request).await?;
    if json {
        return print_json(&resp);
    }
    println!("Session:        {}", resp.session_id);
    println!("Status:         {}", resp.status);
    println!("Queue position: {}", resp.queue_position);
    println!("Estimated wait: {}s", resp.estimated_wait_time);
    Ok(())
}

async fn do_send(
    target: &Target,
    session: Uuid,
    content: &str,
    role: &str,
    client_id: Option<String>,
    json: bool,
) -> anyhow::Result<()> {
    let role: Role = role.parse()?;
    let request = SendMessageRequest {
        content: Some(content.to_string()),
        role: Some(role.as_str().to_string()),
        client_message_id: client_id,
        last_message_timestamp: None,
    };
    let resp = target.transport()?.send_message(session, &request).await?;
    if json {
        return print_json(&resp);
    }
    if resp.duplicate {
        println!("(duplicate; already stored)");
    }
    println!("{}", format_message(&resp.message));
    Ok(())
}

async fn do_pull(target: &Target, session: Uuid, since: Option<&str>, json: bool) -> anyhow::Result<()> {
    let cursor = match since {
        Some(text) => Some(
            timestamp::parse(text).ok_or_else(|| anyhow::anyhow!("invalid --since value '{}'", text))?,
        ),
        None => None,
    };
    let resp = target.transport()?.pull_messages(session, cursor).await?;
    if json {
        return print_json(&resp);
    }
    for m in &resp.messages {
        println!("{}", format_message(m));
    }
    println!("-- status: {}", resp.status);
    if let Some(agent) = &resp.agent_name {
        println!("-- agent:  {}", agent);
    }
    if let Some(cursor) = resp.last_message_timestamp {
        println!("-- cursor: {}", cursor);
    }
    Ok(())
}

async fn do_claim(
    target: &Target,
    session: Uuid,
    agent: &str,
    agent_name: Option<&str>,
    json: bool,
) -> anyhow::Result<()> {
    let resp = target.transport()?.claim_session(session, agent, agent_name).await?;
    if json {
        return print_json(&resp);
    }
    println!(
        "Claimed {} as {} ({})",
        resp.session.id,
        resp.session.agent_name().unwrap_or_else(|| agent.to_string()),
        resp.session.status
    );
    Ok(())
}

async fn do_end(target: &Target, session: Uuid, by: &str, json: bool) -> anyhow::Result<()> {
    let ended_by: EndedBy = by.parse()?;
    let resp = target.transport()?.end_session(session, ended_by).await?;
    if json {
        return print_json(&resp);
    }
    println!("Session {} {}", session, resp.status);
    Ok(())
}

async fn do_sessions(target: &Target, status: Option<&str>, json: bool) -> anyhow::Result<()> {
    let status = status.map(str::parse::<SessionStatus>).transpose()?;
    let resp = target.transport()?.list_sessions(status).await?;
    if json {
        return print_json(&resp);
    }
    if resp.sessions.is_empty() {
        eprintln!("No sessions.");
        return Ok(());
    }
    for s in &resp.sessions {
        println!(
            "{}  {:<8} {:<24} {}",
            s.id,
            s.status.as_str(),
            s.customer_email,
            s.agent_name().unwrap_or_default()
        );
    }
    Ok(())
}

async fn do_status(target: &Target, json: bool) -> anyhow::Result<()> {
    let body = target.transport()?.health().await?;
    if json {
        return print_json(&body);
    }
    println!("Handoff server: {}", body["status"].as_str().unwrap_or("unknown"));
    println!("Version:        {}", body["version"].as_str().unwrap_or("?"));
    println!("Store:          {}", body["store"].as_str().unwrap_or("?"));
    Ok(())
}

/// Interactive customer chat: request an agent, keep the view synced through
/// polling plus the push socket, and send each stdin line.
async fn do_chat(target: &Target, email: &str, name: Option<&str>) -> anyhow::Result<()> {
    let http = Arc::new(target.transport()?);
    let push_url = http.push_url();
    let client = SyncClient::new(http, target.client.clone());
    let mut updates = client.subscribe();

    let resp = client.request_live_agent(email, name, Vec::new()).await?;
    println!(
        "Session {} opened; you are #{} in the queue (about {}s).",
        resp.session_id, resp.queue_position, resp.estimated_wait_time
    );

    let poller = client.start();
    let cancel = CancellationToken::new();
    let (tx, rx) = mpsc::channel(64);
    let pusher = {
        let cancel = cancel.clone();
        let session_id = resp.session_id;
        tokio::spawn(async move {
            // Polling still covers everything if the socket is unavailable.
            if let Err(e) = push::subscribe(&push_url, session_id, tx, cancel).await {
                tracing::warn!(error = %e, "Push channel unavailable; polling only");
            }
        })
    };
    let forwarder = client.attach_push(rx, cancel.clone());

    let printer = tokio::spawn(async move {
        let mut printed = HashSet::new();
        loop {
            match updates.recv().await {
                Ok(SyncUpdate::Messages(messages)) => {
                    for line in unseen_lines(&mut printed, &messages) {
                        println!("{}", line);
                    }
                }
                Ok(SyncUpdate::Mode(mode)) => {
                    println!("{}", mode_banner(mode));
                    if mode == ChatMode::Ended {
                        break;
                    }
                }
                Ok(SyncUpdate::Degraded(reason)) => eprintln!("(connection trouble: {})", reason),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::debug!(skipped = n, "Renderer lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let line = match line? {
                    Some(l) => l,
                    None => break,
                };
                let text = line.trim();
                if text == "/end" {
                    break;
                }
                if text.is_empty() {
                    continue;
                }
                if let Err(e) = client.send(text).await {
                    eprintln!("(not sent: {})", e);
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
        if client.mode().await == ChatMode::Ended {
            break;
        }
    }

    if client.mode().await.is_live() {
        if let Err(e) = client.end(EndedBy::Customer).await {
            eprintln!("(end failed: {})", e);
        }
    }
    cancel.cancel();
    poller.stop().await;
    client.shutdown();
    let _ = tokio::time::timeout(Duration::from_secs(2), printer).await;
    let _ = forwarder.await;
    let _ = pusher.await;
    Ok(())
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let target = match Target::from_cli(&cli) {
        Ok(t) => t,
        Err(e) => {
            eprintln!("handoff-cli: {:#}", e);
            std::process::exit(1);
        }
    };
    let json = cli.json;

    let result = match cli.command {
        Commands::Request { email, name } => do_request(&target, &email, name.as_deref(), json).await,
        Commands::Send {
            session,
            content,
            role,
            client_id,
        } => do_send(&target, session, &content, &role, client_id, json).await,
        Commands::Pull { session, since } => do_pull(&target, session, since.as_deref(), json).await,
        Commands::Claim {
            session,
            agent,
            agent_name,
        } => do_claim(&target, session, &agent, agent_name.as_deref(), json).await,
        Commands::End { session, by } => do_end(&target, session, &by, json).await,
        Commands::Sessions { status } => do_sessions(&target, status.as_deref(), json).await,
        Commands::Chat { email, name } => do_chat(&target, &email, name.as_deref()).await,
        Commands::Status => do_status(&target, json).await,
    };

    if let Err(e) = result {
        eprintln!("handoff-cli: {}", e);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(role: Role, content: &str, ts: i64, cmid: Option<&str>, id: Option<Uuid>) -> WireMessage {
        WireMessage {
            id,
            role,
            content: content.to_string(),
            timestamp: ts,
            category: "text".to_string(),
            client_message_id: cmid.map(str::to_string),
        }
    }

    #[test]
    fn test_format_message_uses_utc_clock_and_role_label() {
        // 2023-11-14T22:13:20Z
        let m = msg(Role::Agent, "Hello", 1_700_000_000_000, None, Some(Uuid::new_v4()));
        assert_eq!(format_message(&m), "[22:13:20] agent: Hello");

        let m = msg(Role::User, "Hi", 1_700_000_000_000, None, None);
        assert_eq!(format_message(&m), "[22:13:20] you: Hi");

        let m = msg(Role::System, "Priya has joined the conversation", 1_700_000_000_000, None, None);
        assert!(format_message(&m).starts_with("[22:13:20] *: "));
    }

    #[test]
    fn test_optimistic_echo_and_stored_copy_print_once() {
        let mut printed = HashSet::new();
        let echo = msg(Role::User, "Hi", 1_700_000_000_000, Some("c-1"), None);
        assert_eq!(unseen_lines(&mut printed, &[echo.clone()]).len(), 1);

        let stored = msg(Role::User, "Hi", 1_700_000_000_004, Some("c-1"), Some(Uuid::new_v4()));
        let reply = msg(Role::Agent, "Hello", 1_700_000_001_000, None, Some(Uuid::new_v4()));
        let lines = unseen_lines(&mut printed, &[stored, reply.clone()]);
        assert_eq!(lines, vec![format_message(&reply)]);

        assert!(unseen_lines(&mut printed, &[reply]).is_empty());
    }

    #[test]
    fn test_cli_parses_send_with_flags() {
        let sid = Uuid::new_v4();
        let cli = Cli::try_parse_from([
            "handoff-cli",
            "--json",
            "send",
            &sid.to_string(),
            "hello there",
            "--role",
            "agent",
            "--client-id",
            "c-9",
        ])
        .unwrap();
        assert!(cli.json);
        match cli.command {
            Commands::Send {
                session,
                content,
                role,
                client_id,
            } => {
                assert_eq!(session, sid);
                assert_eq!(content, "hello there");
                assert_eq!(role, "agent");
                assert_eq!(client_id.as_deref(), Some("c-9"));
            }
            _ => panic!("expected send"),
        }
    }

    #[test]
    fn test_config_flag_sets_client_timing() {
        let path = std::env::temp_dir().join(format!("handoff-cli-{}.toml", Uuid::new_v4()));
        std::fs::write(&path, "[client]\npoll_interval_secs = 3\nrequest_timeout_secs = 20\n").unwrap();

        let cli = Cli::try_parse_from([
            "handoff-cli",
            "--config",
            path.to_str().unwrap(),
            "--server",
            "http://chat.example.com/",
            "status",
        ])
        .unwrap();
        let target = Target::from_cli(&cli).unwrap();
        assert_eq!(target.server, "http://chat.example.com");
        assert_eq!(target.client.poll_interval(), Duration::from_secs(3));
        assert_eq!(target.client.request_timeout(), Duration::from_secs(20));

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_missing_config_file_is_reported() {
        let cli = Cli::try_parse_from(["handoff-cli", "--config", "/nonexistent/handoff.toml", "status"]).unwrap();
        assert!(Target::from_cli(&cli).is_err());
    }

    #[test]
    fn test_cli_rejects_bad_session_id() {
        assert!(Cli::try_parse_from(["handoff-cli", "pull", "not-a-uuid"]).is_err());
    }
}
