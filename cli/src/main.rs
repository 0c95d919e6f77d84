//! Shellcast CLI - Command-line interface for the Shellcast orchestrator
//!
//! Creates sessions, runs commands in them and follows their live output

use std::fs;
use std::io::{BufRead, BufReader};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use reqwest::blocking::{Client, Response};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Shellcast CLI - remote container terminals
#[derive(Parser)]
#[command(name = "shellcast")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "CLI for Shellcast - session-scoped container terminals", long_about = None)]
struct Cli {
    /// Shellcast API URL
    #[arg(short, long, default_value = "http://127.0.0.1:8080")]
    api_url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new terminal session
    Session,

    /// Run a command in a session's environment
    Exec {
        /// User id, also the git author name inside the environment
        #[arg(short, long)]
        user: String,

        /// User email, also the git author email
        #[arg(short, long)]
        email: String,

        /// Session id from `shellcast session`
        #[arg(short, long)]
        session: String,

        /// Command to run (or path to a script with @ prefix)
        command: String,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        output: String,
    },

    /// Follow a session's live output
    Listen {
        /// Session id
        #[arg(short, long)]
        session: String,

        /// Channel to follow
        #[arg(short, long, value_enum, default_value_t = Channel::Stdout)]
        channel: Channel,

        /// Print payloads exactly as published
        #[arg(long)]
        raw: bool,
    },

    /// Get server health status
    Health,
}

#[derive(Clone, Copy, ValueEnum)]
enum Channel {
    Stdout,
    Stderr,
}

impl Channel {
    fn as_str(self) -> &'static str {
        match self {
            Channel::Stdout => "stdout",
            Channel::Stderr => "stderr",
        }
    }
}

#[derive(Debug, Serialize)]
struct User {
    id: String,
    email: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ExecutionRequest {
    user: User,
    session_id: String,
    command: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct ExecutionOutput {
    text: String,
    html: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionResponse {
    session_id: String,
}

#[derive(Debug, Deserialize)]
struct HealthResponse {
    status: String,
    version: String,
    uptime_seconds: u64,
    active_sessions: u64,
    bound_environments: u64,
    runtime_version: Option<String>,
}

/// Turn a non-2xx response into an error carrying the server's message
fn check(response: Response, what: &str) -> Result<Response> {
    if response.status().is_success() {
        return Ok(response);
    }

    let status = response.status();
    let body: Value = response.json().unwrap_or(Value::Null);
    let message = body["message"].as_str().unwrap_or("Unknown error");
    anyhow::bail!("{} failed ({}): {}", what, status, message)
}

/// Render one published payload
fn print_event(payload: &str) {
    let Ok(event) = serde_json::from_str::<Value>(payload) else {
        println!("{}", payload);
        return;
    };

    let command = event["command"].as_str().unwrap_or("?");
    println!("{} {}", "$".bright_blue().bold(), command.bright_cyan());
    if let Some(text) = event["output"]["text"].as_str() {
        print!("{}", text);
        if !text.ends_with('\n') && !text.is_empty() {
            println!();
        }
    }
    if let Some(error) = event["error"].as_str() {
        println!("{} {}", "error:".bright_red().bold(), error);
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let client = Client::new();

    match cli.command {
        Commands::Session => {
            let response = client
                .get(format!("{}/terminal/session", cli.api_url))
                .send()
                .context("Failed to create session")?;

            let session: SessionResponse = check(response, "Session request")?
                .json()
                .context("Failed to parse response")?;
            println!("{}", session.session_id);
        }

        Commands::Exec {
            user,
            email,
            session,
            command,
            output,
        } => {
            // Read the command from a script if it starts with @
            let command = if let Some(file_path) = command.strip_prefix('@') {
                fs::read_to_string(file_path)
                    .with_context(|| format!("Failed to read script: {}", file_path))?
            } else {
                command
            };

            let request = ExecutionRequest {
                user: User { id: user, email },
                session_id: session,
                command,
            };

            let response = client
                .post(format!("{}/terminal/execute", cli.api_url))
                .json(&request)
                .send()
                .context("Failed to send request")?;

            let result: ExecutionOutput = check(response, "Execution")?
                .json()
                .context("Failed to parse response")?;

            if output == "json" {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                print!("{}", result.text);
            }
        }

        Commands::Listen {
            session,
            channel,
            raw,
        } => {
            // The stream stays open until the server or the user ends it
            let client = Client::builder()
                .timeout(None::<std::time::Duration>)
                .build()
                .context("Failed to build HTTP client")?;

            let response = client
                .get(format!(
                    "{}/terminal/listen/{}/{}",
                    cli.api_url,
                    channel.as_str(),
                    session
                ))
                .send()
                .context("Failed to subscribe")?;
            let response = check(response, "Subscribe")?;

            eprintln!(
                "{} {} {}",
                "Listening on".bright_cyan(),
                format!("terminal:{}:{}", session, channel.as_str()).bold(),
                "(Ctrl+C to stop)".dimmed()
            );

            for line in BufReader::new(response).lines() {
                let line = line.context("Stream interrupted")?;
                let Some(data) = line.strip_prefix("data:") else {
                    continue;
                };
                let data = data.trim_start();
                if raw {
                    println!("{}", data);
                } else {
                    print_event(data);
                }
            }
        }

        Commands::Health => {
            let response = client
                .get(format!("{}/health", cli.api_url))
                .send()
                .context("Failed to get health")?;

            let health: HealthResponse = check(response, "Health check")?
                .json()
                .context("Failed to parse response")?;

            println!("{}", "Shellcast Orchestrator Status".bright_cyan().bold());
            println!("{}", "=".repeat(40).bright_blue());
            println!(
                "{} {}",
                "Status:".cyan(),
                if health.status == "healthy" {
                    health.status.green()
                } else {
                    health.status.yellow()
                }
            );
            println!("{} {}", "Version:".cyan(), health.version);
            println!("{} {}s", "Uptime:".cyan(), health.uptime_seconds);
            println!("{} {}", "Active Sessions:".cyan(), health.active_sessions);
            println!("{} {}", "Environments:".cyan(), health.bound_environments);
            println!(
                "{} {}",
                "Runtime:".cyan(),
                health.runtime_version.as_deref().unwrap_or("unavailable")
            );
        }
    }

    Ok(())
}
