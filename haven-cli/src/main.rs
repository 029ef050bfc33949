//! haven-cli: operator tool for the Haven HTTP API
//!
//! # Subcommands
//! - `status`                                              show server health
//! - `process --user <id> --conversation <id> <file>`      run the transcript pipeline
//! - `personalize --user <id> [--module <id>]`             prepare the next session
//! - `next-session --user <id> [--consume] [--json]`       print the prepared script
//! - `mood --user <id> --score <1-10> [--note <text>]`     record a mood score
//! - `sign-webhook <file> [--timestamp <t>]`               print a post-call signature header

use std::io::Read;

use clap::{Parser, Subcommand};
use serde::Deserialize;

const DEFAULT_SERVER: &str = "http://127.0.0.1:8780";

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Debug, Parser)]
#[command(name = "haven-cli", version, about = "Haven therapy session API client")]
struct Cli {
    /// Haven HTTP server URL (overrides HAVEN_HTTP_URL env var)
    #[arg(long, env = "HAVEN_HTTP_URL", default_value = DEFAULT_SERVER)]
    server: String,

    /// Bearer token for servers started with `http.api_token`
    #[arg(long, env = "HAVEN_API_TOKEN")]
    token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Show Haven server status
    Status,

    /// Extract insights from a transcript file and update the user's profile
    Process {
        #[arg(long)]
        user: String,

        #[arg(long)]
        conversation: String,

        /// Transcript file, or `-` for stdin
        file: String,

        /// Call length in seconds
        #[arg(long)]
        duration: Option<f64>,
    },

    /// Personalize the user's next session from a therapy module
    Personalize {
        #[arg(long)]
        user: String,

        /// Module id; the server's default module is used when omitted
        #[arg(long)]
        module: Option<String>,
    },

    /// Show the prepared next session
    NextSession {
        #[arg(long)]
        user: String,

        /// Mark the script as used
        #[arg(long)]
        consume: bool,

        /// Print the raw JSON response
        #[arg(long)]
        json: bool,
    },

    /// Record a mood score
    Mood {
        #[arg(long)]
        user: String,

        #[arg(long)]
        score: i16,

        #[arg(long)]
        note: Option<String>,
    },

    /// Sign a post-call webhook body, for replaying calls against a dev server
    SignWebhook {
        /// JSON body file, or `-` for stdin
        file: String,

        #[arg(long, env = "ELEVENLABS_WEBHOOK_SECRET", hide_env_values = true)]
        secret: String,

        /// Unix timestamp to sign with (defaults to now)
        #[arg(long)]
        timestamp: Option<i64>,
    },
}

// ============================================================================
// API Response Types
// ============================================================================

/// Body of GET /users/{id}/next-session
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NextSessionResponse {
    pub greeting: String,
    pub instructions: String,
    pub agenda: String,
    pub status: String,
    pub updated_at: Option<String>,
}

/// Human-readable rendering of a prepared session.
pub fn render_next_session(next: &NextSessionResponse) -> String {
    format!(
        "Status:   {}\nUpdated:  {}\n\nGreeting\n  {}\n\nInstructions\n  {}\n\nAgenda\n{}",
        next.status,
        next.updated_at.as_deref().unwrap_or("?"),
        next.greeting,
        next.instructions,
        next.agenda
            .lines()
            .map(|l| format!("  {}", l))
            .collect::<Vec<_>>()
            .join("\n")
    )
}

/// One-line summary of a process-transcript response.
pub fn render_insights(body: &serde_json::Value) -> String {
    let list = |key: &str| {
        body[key]
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .filter_map(|i| i.as_str())
                    .collect::<Vec<_>>()
                    .join("; ")
            })
            .unwrap_or_default()
    };
    format!(
        "Title:   {}\nSummary: {}\nGoals:   {}\nThemes:  {}",
        body["title"].as_str().unwrap_or(""),
        body["summary"].as_str().unwrap_or(""),
        list("goals"),
        list("themes"),
    )
}

// ============================================================================
// HTTP Client Calls
// ============================================================================

fn client(timeout_secs: u64) -> anyhow::Result<reqwest::blocking::Client> {
    Ok(reqwest::blocking::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()?)
}

/// Send a request and return the JSON body, exiting on transport or HTTP errors.
fn send(
    request: reqwest::blocking::RequestBuilder,
    token: Option<&str>,
    url: &str,
) -> serde_json::Value {
    let request = match token {
        Some(t) => request.bearer_auth(t),
        None => request,
    };

    let resp = match request.send() {
        Ok(r) => r,
        Err(e) => {
            eprintln!("haven-cli: connection failed to {}: {}", url, e);
            std::process::exit(1);
        }
    };

    let status = resp.status();
    let body: serde_json::Value = resp.json().unwrap_or_default();
    if !status.is_success() {
        eprintln!(
            "haven-cli: server returned {}: {}",
            status,
            body["error"].as_str().unwrap_or("no error message")
        );
        std::process::exit(1);
    }
    body
}

fn read_input(file: &str) -> anyhow::Result<String> {
    if file == "-" {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        Ok(buf)
    } else {
        Ok(std::fs::read_to_string(file)?)
    }
}

/// Show the server status by calling GET /health.
fn do_status(server: &str) -> anyhow::Result<()> {
    let url = format!("{}/health", server);
    let resp = client(10)?.get(&url).send();

    match resp {
        Ok(r) if r.status().is_success() => {
            let body: serde_json::Value = r.json().unwrap_or_default();
            println!("Haven server: {}", body["status"].as_str().unwrap_or("unknown"));
            println!("Version:      {}", body["version"].as_str().unwrap_or("?"));
            println!("Store:        {}", body["store"].as_str().unwrap_or("?"));
        }
        Ok(r) => {
            let status = r.status();
            eprintln!("haven-cli: server unhealthy (HTTP {})", status);
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("haven-cli: cannot reach {}: {}", url, e);
            std::process::exit(1);
        }
    }

    Ok(())
}

fn do_process(
    server: &str,
    token: Option<&str>,
    user: &str,
    conversation: &str,
    file: &str,
    duration: Option<f64>,
) -> anyhow::Result<()> {
    let transcript = read_input(file)?;
    let url = format!("{}/process-transcript", server);
    let body = serde_json::json!({
        "userId": user,
        "conversationId": conversation,
        "transcript": transcript,
        "duration": duration,
    });

    // Two completion calls happen server-side; allow for slow models.
    let resp = send(client(180)?.post(&url).json(&body), token, &url);
    println!("{}", render_insights(&resp));
    Ok(())
}

fn do_personalize(
    server: &str,
    token: Option<&str>,
    user: &str,
    module: Option<&str>,
) -> anyhow::Result<()> {
    let url = format!("{}/synthesize-therapy-session", server);
    let body = serde_json::json!({ "userId": user, "moduleId": module });
    let resp = send(client(120)?.post(&url).json(&body), token, &url);
    let next: NextSessionResponse = serde_json::from_value(resp)?;
    println!("{}", render_next_session(&next));
    Ok(())
}

fn do_next_session(
    server: &str,
    token: Option<&str>,
    user: &str,
    consume: bool,
    json_output: bool,
) -> anyhow::Result<()> {
    let mut url = format!("{}/users/{}/next-session", server, user);
    if consume {
        url.push_str("?consume=true");
    }
    let resp = send(client(10)?.get(&url), token, &url);

    if json_output {
        println!("{}", serde_json::to_string_pretty(&resp)?);
    } else {
        let next: NextSessionResponse = serde_json::from_value(resp)?;
        println!("{}", render_next_session(&next));
    }
    Ok(())
}

fn do_mood(
    server: &str,
    token: Option<&str>,
    user: &str,
    score: i16,
    note: Option<&str>,
) -> anyhow::Result<()> {
    let url = format!("{}/mood", server);
    let body = serde_json::json!({ "userId": user, "score": score, "note": note });
    let resp = send(client(10)?.post(&url).json(&body), token, &url);
    println!(
        "Recorded mood {} at {}",
        resp["score"],
        resp["createdAt"].as_str().unwrap_or("?")
    );
    Ok(())
}

fn do_sign_webhook(file: &str, secret: &str, timestamp: Option<i64>) -> anyhow::Result<()> {
    let body = read_input(file)?;
    let ts = timestamp.unwrap_or_else(|| chrono::Utc::now().timestamp());
    println!(
        "{}: {}",
        haven_core::webhook::SIGNATURE_HEADER,
        haven_core::webhook::signature_header(secret, ts, body.as_bytes())
    );
    Ok(())
}

// ============================================================================
// Main
// ============================================================================

fn main() {
    let cli = Cli::parse();
    let server = cli.server.trim_end_matches('/').to_string();
    let token = cli.token.as_deref();

    let result = match cli.command {
        Commands::Status => do_status(&server),
        Commands::Process {
            user,
            conversation,
            file,
            duration,
        } => do_process(&server, token, &user, &conversation, &file, duration),
        Commands::Personalize { user, module } => {
            do_personalize(&server, token, &user, module.as_deref())
        }
        Commands::NextSession {
            user,
            consume,
            json,
        } => do_next_session(&server, token, &user, consume, json),
        Commands::Mood { user, score, note } => {
            do_mood(&server, token, &user, score, note.as_deref())
        }
        Commands::SignWebhook {
            file,
            secret,
            timestamp,
        } => do_sign_webhook(&file, &secret, timestamp),
    };

    if let Err(e) = result {
        eprintln!("haven-cli: {}", e);
        std::process::exit(1);
    }
}

// ============================================================================
// Tests
// ============================================================================
