//! parley-cli — terminal chat front-end for the Parley HTTP API
//!
//! Presents the transcript in the terminal and turns the two UI events the
//! core cares about — prompt submission and thumbs feedback — into HTTP
//! calls against a running parley-server.
//!
//! # Subcommands
//! - `chat [--session <key>] [--provider <name>]` — interactive chat loop
//! - `send <prompt> [--json]`                      — one-shot submit
//! - `feedback <turn> <value>`                     — thumbs up/down for a turn
//! - `history`                                     — print the transcript
//! - `status`                                      — show server health

use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::io::{BufRead, Write};

const DEFAULT_SERVER: &str = "http://127.0.0.1:8787";
const DEFAULT_SESSION: &str = "cli";

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Debug, Parser)]
#[command(
    name = "parley-cli",
    version,
    about = "Parley chat — talk to a provider, rate the answers"
)]
struct Cli {
    /// Parley HTTP server URL (overrides PARLEY_HTTP_URL env var)
    #[arg(long, env = "PARLEY_HTTP_URL", default_value = DEFAULT_SERVER)]
    server: String,

    /// Session key; conversations with the same key share a transcript
    #[arg(long, env = "PARLEY_SESSION", default_value = DEFAULT_SESSION)]
    session: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Interactive chat loop (`/up`, `/down`, `/history`, `/quit` inside)
    Chat {
        /// Provider to bind the session to on first use
        #[arg(long)]
        provider: Option<String>,
    },

    /// Send a single prompt and print the reply
    Send {
        /// Prompt text to submit
        prompt: String,

        /// Provider to bind the session to on first use
        #[arg(long)]
        provider: Option<String>,

        /// Print the raw JSON response
        #[arg(long)]
        json: bool,
    },

    /// Submit thumbs feedback for a turn ("up"/"down"/1/0)
    Feedback {
        /// Turn index as printed by chat/history
        turn: usize,

        /// Feedback value
        value: String,
    },

    /// Print the session transcript
    History,

    /// Show Parley server status
    Status,
}

// ============================================================================
// API Response Types
// ============================================================================

/// One transcript entry from GET /history/{session}
#[derive(Debug, Deserialize)]
pub struct TurnView {
    pub role: String,
    pub content: String,
    pub trace_id: Option<String>,
    pub feedback: Option<String>,
}

/// The full transcript response
#[derive(Debug, Deserialize)]
pub struct HistoryResponse {
    pub session: String,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub turns: Vec<TurnView>,
}

/// Reply from POST /chat
#[derive(Debug, Deserialize)]
pub struct ChatReply {
    pub reply: String,
    pub turn_index: usize,
    pub trace_id: Option<String>,
}

/// Reply from POST /feedback
#[derive(Debug, Deserialize)]
pub struct FeedbackReply {
    pub recorded: bool,
    pub scored: bool,
}

// ============================================================================
// Transcript rendering
// ============================================================================

/// Render one transcript entry: `[index] role> content`, with a thumbs
/// marker when the turn has feedback.
pub fn render_turn(index: usize, turn: &TurnView) -> String {
    let marker = match turn.feedback.as_deref() {
        Some("up") => " [+1]",
        Some("down") => " [-1]",
        _ => "",
    };
    format!("[{}] {}>{} {}", index, turn.role, marker, turn.content)
}

/// Parse a REPL feedback command (`/up`, `/down`, optionally `/up 3`) into
/// (value, explicit turn index).
pub fn parse_feedback_command(line: &str) -> Option<(&'static str, Option<usize>)> {
    let mut parts = line.split_whitespace();
    let value = match parts.next() {
        Some("/up") => "up",
        Some("/down") => "down",
        _ => return None,
    };
    let turn = parts.next().and_then(|t| t.parse().ok());
    Some((value, turn))
}

// ============================================================================
// HTTP Client Calls
// ============================================================================

fn make_client() -> anyhow::Result<reqwest::blocking::Client> {
    Ok(reqwest::blocking::Client::builder()
        .timeout(std::time::Duration::from_secs(120))
        .build()?)
}

fn submit_prompt(
    client: &reqwest::blocking::Client,
    server: &str,
    session: &str,
    provider: Option<&str>,
    prompt: &str,
) -> anyhow::Result<ChatReply> {
    let url = format!("{}/chat", server);
    let body = serde_json::json!({
        "session": session,
        "provider": provider,
        "prompt": prompt,
    });

    let resp = client.post(&url).json(&body).send()?;

    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().unwrap_or_default();
        anyhow::bail!("server returned {}: {}", status, body);
    }

    Ok(resp.json()?)
}

fn submit_feedback(
    client: &reqwest::blocking::Client,
    server: &str,
    session: &str,
    turn: usize,
    value: &str,
) -> anyhow::Result<FeedbackReply> {
    let url = format!("{}/feedback", server);
    let body = serde_json::json!({
        "session": session,
        "turn": turn,
        "value": value,
    });

    let resp = client.post(&url).json(&body).send()?;

    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().unwrap_or_default();
        anyhow::bail!("server returned {}: {}", status, body);
    }

    Ok(resp.json()?)
}

fn fetch_history(
    client: &reqwest::blocking::Client,
    server: &str,
    session: &str,
) -> anyhow::Result<HistoryResponse> {
    let url = format!("{}/history/{}", server, session);
    let resp = client.get(&url).send()?;

    if !resp.status().is_success() {
        let status = resp.status();
        anyhow::bail!("server returned {}", status);
    }

    Ok(resp.json()?)
}

// ============================================================================
// Subcommand runners
// ============================================================================

/// Interactive chat loop over stdin.
fn do_chat(server: &str, session: &str, provider: Option<&str>) -> anyhow::Result<()> {
    let client = make_client()?;

    println!("Parley chat — session '{}' on {}", session, server);
    println!("Type a prompt; /up, /down, /history, /quit.");

    let stdin = std::io::stdin();
    let mut last_turn: Option<usize> = None;

    loop {
        print!("you> ");
        std::io::stdout().flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let line = line.trim();

        if line.is_empty() {
            continue;
        }
        if line == "/quit" || line == "/exit" {
            break;
        }
        if line == "/history" {
            print_history(&client, server, session)?;
            continue;
        }
        if let Some((value, explicit_turn)) = parse_feedback_command(line) {
            let Some(turn) = explicit_turn.or(last_turn) else {
                eprintln!("Nothing to rate yet — send a prompt first.");
                continue;
            };
            match submit_feedback(&client, server, session, turn, value) {
                Ok(reply) if reply.recorded => {
                    let note = if reply.scored { "" } else { " (not scored)" };
                    println!("Feedback recorded for turn {}{}", turn, note);
                }
                Ok(_) => eprintln!("Turn {} is gone — feedback dropped.", turn),
                Err(e) => eprintln!("parley-cli: {}", e),
            }
            continue;
        }

        match submit_prompt(&client, server, session, provider, line) {
            Ok(reply) => {
                println!("[{}] assistant> {}", reply.turn_index, reply.reply);
                last_turn = Some(reply.turn_index);
            }
            Err(e) => eprintln!("parley-cli: {}", e),
        }
    }

    Ok(())
}

/// One-shot prompt submission.
fn do_send(
    server: &str,
    session: &str,
    provider: Option<&str>,
    prompt: &str,
    json_output: bool,
) -> anyhow::Result<()> {
    let client = make_client()?;
    let reply = submit_prompt(&client, server, session, provider, prompt)?;

    if json_output {
        println!(
            "{}",
            serde_json::json!({
                "reply": reply.reply,
                "turn_index": reply.turn_index,
                "trace_id": reply.trace_id,
            })
        );
    } else {
        println!("[{}] assistant> {}", reply.turn_index, reply.reply);
    }

    Ok(())
}

/// Out-of-band feedback submission.
fn do_feedback(server: &str, session: &str, turn: usize, value: &str) -> anyhow::Result<()> {
    let client = make_client()?;
    let reply = submit_feedback(&client, server, session, turn, value)?;

    if reply.recorded {
        let note = if reply.scored { "" } else { " (not scored)" };
        println!("Feedback recorded for turn {}{}", turn, note);
    } else {
        println!("Turn {} does not exist — feedback dropped.", turn);
    }

    Ok(())
}

fn print_history(
    client: &reqwest::blocking::Client,
    server: &str,
    session: &str,
) -> anyhow::Result<()> {
    let history = fetch_history(client, server, session)?;

    if history.turns.is_empty() {
        println!("(empty transcript for session '{}')", history.session);
        return Ok(());
    }

    if let (Some(provider), Some(model)) = (&history.provider, &history.model) {
        println!("Session '{}' — {} ({})", history.session, provider, model);
    }
    for (index, turn) in history.turns.iter().enumerate() {
        println!("{}", render_turn(index, turn));
    }

    Ok(())
}

fn do_history(server: &str, session: &str) -> anyhow::Result<()> {
    let client = make_client()?;
    print_history(&client, server, session)
}

/// Show the server status by calling GET /health.
fn do_status(server: &str) -> anyhow::Result<()> {
    let client = reqwest::blocking::Client::builder()
        .timeout(std::time::Duration::from_secs(10))
        .build()?;

    let url = format!("{}/health", server);
    let resp = client.get(&url).send();

    match resp {
        Ok(r) if r.status().is_success() => {
            let body: serde_json::Value = r.json().unwrap_or_default();
            println!("Parley server: {}", body["status"].as_str().unwrap_or("unknown"));
            println!("Version:       {}", body["version"].as_str().unwrap_or("?"));
            println!("Default:       {}", body["default_provider"].as_str().unwrap_or("?"));
            println!(
                "Providers:     {}",
                body["providers"]
                    .as_array()
                    .map(|a| a
                        .iter()
                        .filter_map(|p| p.as_str())
                        .collect::<Vec<_>>()
                        .join(", "))
                    .unwrap_or_else(|| "?".to_string())
            );
            println!(
                "Trace sink:    {}",
                if body["trace_sink"].as_bool().unwrap_or(false) {
                    "configured"
                } else {
                    "local only"
                }
            );
        }
        Ok(r) => {
            let status = r.status();
            eprintln!("parley-cli: server unhealthy (HTTP {})", status);
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("parley-cli: cannot reach {} — {}", url, e);
            std::process::exit(1);
        }
    }

    Ok(())
}

// ============================================================================
// Main
// ============================================================================

fn main() {
    let cli = Cli::parse();
    let server = cli.server.trim_end_matches('/').to_string();

    let result = match cli.command {
        Commands::Chat { provider } => do_chat(&server, &cli.session, provider.as_deref()),
        Commands::Send {
            prompt,
            provider,
            json,
        } => do_send(&server, &cli.session, provider.as_deref(), &prompt, json),
        Commands::Feedback { turn, value } => do_feedback(&server, &cli.session, turn, &value),
        Commands::History => do_history(&server, &cli.session),
        Commands::Status => do_status(&server),
    };

    if let Err(e) = result {
        eprintln!("parley-cli: {}", e);
        std::process::exit(1);
    }
}

// ============================================================================
// Tests
// ============================================================================
