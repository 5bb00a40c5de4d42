//! Command-line front end for a remote runbox runner.
//!
//! Run with:
//! ```sh
//! RUNBOX_WS_URL=ws://localhost:8080/ws cargo run -p runbox-cli -- run -l python hello.py
//! ```
//!
//! Lines typed on stdin are forwarded to the running program.

use std::{path::PathBuf, process::ExitCode, sync::Arc, time::Duration};

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use runbox_core::{Banner, DEFAULT_TIMEOUT_MS, Language, SharePayload, Transcript, TranscriptEntry};
use runbox_session::{RunRequest, Session, SessionConfig, config};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Exit status used when the runner killed the job for running too long.
const EXIT_TIMED_OUT: u8 = 124;

#[derive(Debug, Parser)]
#[command(name = "runbox", version, about = "Run code on a remote runbox runner")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run a program and stream its output
    Run {
        /// Runner endpoint
        #[arg(long, env = config::ENV_URL)]
        url: String,

        /// Access token
        #[arg(long, env = config::ENV_TOKEN, hide_env_values = true)]
        token: Option<String>,

        /// Job timeout in milliseconds
        #[arg(long, env = config::ENV_TIMEOUT_MS, default_value_t = DEFAULT_TIMEOUT_MS)]
        timeout_ms: u64,

        /// Program language; required unless --share is given
        #[arg(short, long)]
        language: Option<Language>,

        /// Source file; the language's starter program when omitted
        file: Option<PathBuf>,

        /// Run the program carried by a share link instead
        #[arg(long, conflicts_with_all = ["language", "file"])]
        share: Option<String>,
    },
    /// Print a share link for a program
    Share {
        #[arg(short, long)]
        language: Language,

        file: PathBuf,

        /// Origin the link points at
        #[arg(long, default_value = "http://localhost:3000/")]
        origin: String,
    },
    /// Print the starter program for a language
    Template {
        language: Language,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    match Cli::parse().command {
        Command::Run {
            url,
            token,
            timeout_ms,
            language,
            file,
            share,
        } => {
            let config = SessionConfig::new(url, token)
                .with_default_timeout(Duration::from_millis(timeout_ms));
            let request = match share {
                Some(link) => {
                    let payload = SharePayload::from_url(&link).context("Invalid share link")?;
                    RunRequest::new(payload.language, payload.code)
                }
                None => {
                    let Some(language) = language else {
                        bail!("--language is required unless --share is given");
                    };
                    RunRequest::new(language.as_str(), read_program(language, file.as_ref()).await?)
                }
            };
            run(config, request).await
        }
        Command::Share {
            language,
            file,
            origin,
        } => {
            let code = read_program(language, Some(&file)).await?;
            println!("{}", SharePayload::new(language.as_str(), code).to_url(&origin)?);
            Ok(ExitCode::SUCCESS)
        }
        Command::Template { language } => {
            print!("{}", language.template());
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn read_program(language: Language, file: Option<&PathBuf>) -> anyhow::Result<String> {
    match file {
        Some(path) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display())),
        None => Ok(language.template().to_string()),
    }
}

async fn run(config: SessionConfig, request: RunRequest) -> anyhow::Result<ExitCode> {
    let session = Session::websocket(config);
    let transcript = Arc::new(Transcript::new());
    let mut output = transcript.history_plus_stream();

    let sink = Arc::clone(&transcript);
    let session_id = session
        .run(move |event| sink.record(&event), request)
        .await
        .context("Failed to start the job")?;
    tracing::debug!(%session_id, "Job submitted");

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let mut stdout = tokio::io::stdout();
    let mut stderr = tokio::io::stderr();

    loop {
        tokio::select! {
            entry = output.next() => {
                let Some(entry) = entry else {
                    bail!("Output stream ended unexpectedly");
                };
                match &entry {
                    TranscriptEntry::Stdout(chunk) => {
                        stdout.write_all(chunk.as_bytes()).await?;
                        stdout.flush().await?;
                    }
                    TranscriptEntry::Stderr(chunk) => {
                        stderr.write_all(chunk.as_bytes()).await?;
                        stderr.flush().await?;
                    }
                    TranscriptEntry::Banner(banner) => {
                        stderr.write_all(banner.text().as_bytes()).await?;
                        stderr.flush().await?;
                        return Ok(exit_code(banner));
                    }
                    // The terminal already shows what was typed.
                    TranscriptEntry::Echo(_) | TranscriptEntry::Cleared => {}
                }
            }
            line = stdin.next_line(), if stdin_open => match line? {
                Some(line) => {
                    let input = format!("{line}\n");
                    if session.send_stdin(input.as_str()).await? {
                        transcript.push_echo(input);
                    }
                }
                None => stdin_open = false,
            },
        }
    }
}

fn exit_code(banner: &Banner) -> ExitCode {
    match banner {
        Banner::Success => ExitCode::SUCCESS,
        Banner::Failure { exit_code } => exit_code
            .and_then(|code| u8::try_from(code).ok())
            .filter(|code| *code != 0)
            .map_or(ExitCode::FAILURE, ExitCode::from),
        Banner::TimedOut => ExitCode::from(EXIT_TIMED_OUT),
        Banner::JobError { .. }
        | Banner::ConnectionFailed { .. }
        | Banner::ConnectionLost { .. } => ExitCode::FAILURE,
    }
}
