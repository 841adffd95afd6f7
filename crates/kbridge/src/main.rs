//
// main.rs
//
// Copyright (C) 2024-2025 Posit Software, PBC. All rights reserved.
// Licensed under the MIT License. See LICENSE.txt for license information.
//
//

//! Command line front end: starts a kernel, runs code in it, and prints
//! every kernel event as a line of JSON.

use std::fs::File;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use kbridge::{
    config::SessionConfig,
    kernel_session::{environment::python_virtual_environments, make_message_id},
    session_manager::KernelSessionManager,
    wire_message::SignaturePolicy,
};
use kbshared::kernel_message::{ExecutionState, KernelEvent};
use log::LevelFilter;
use simplelog::{ColorChoice, CombinedLogger, Config, TermLogger, TerminalMode, WriteLogger};
use tokio::io::AsyncBufReadExt;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// The project directory; connection files and kernel specs are kept in
    /// its `code/` subdirectory
    #[arg(short, long, default_value = ".")]
    project: PathBuf,

    /// The language of the kernel to run: python, go, javascript, or java
    #[arg(short = 'L', long)]
    language: String,

    /// The Python virtual environment to run the kernel in. Defaults to the
    /// first one found in the project's `code/` directory.
    #[arg(long)]
    venv: Option<PathBuf>,

    /// Code to run. May be given more than once; if omitted, each line read
    /// from standard input is run.
    #[arg(short, long)]
    code: Vec<String>,

    /// The path to a log file. If specified, log output will be written to this
    /// file in addition to standard error.
    #[arg(long)]
    log_file: Option<String>,

    /// The log level to use. Valid values are "trace", "debug", "info", "warn",
    /// and "error". If not specified, the default log level is "info", or the
    /// value of `RUST_LOG` if set.
    #[arg(short, long)]
    log_level: Option<String>,

    /// Reject kernel messages whose signature doesn't match
    #[arg(long)]
    verify_signatures: bool,

    /// Seconds to wait for the kernel to shut down before giving up
    #[arg(long, default_value_t = 5)]
    shutdown_timeout: u64,
}

fn init_logging(args: &Args) -> anyhow::Result<()> {
    let log_level = match args.log_level {
        Some(ref level) => level.to_string(),
        None => std::env::var("RUST_LOG").unwrap_or_else(|_| String::from("info")),
    };

    // Match the log level to a `LevelFilter`
    let log_level = match log_level.as_str() {
        "trace" => LevelFilter::Trace,
        "debug" => LevelFilter::Debug,
        "info" => LevelFilter::Info,
        "warn" => LevelFilter::Warn,
        "error" => LevelFilter::Error,
        _ => {
            eprintln!("Invalid log level '{}'; using 'info'", log_level);
            LevelFilter::Info
        }
    };

    // Standard output carries the events, so the terminal logger writes to
    // standard error.
    let term = TermLogger::new(
        log_level,
        Config::default(),
        TerminalMode::Stderr,
        ColorChoice::Auto,
    );
    match args.log_file {
        Some(ref log_file) => {
            let file = File::create(log_file)
                .with_context(|| format!("Failed to create log file {}", log_file))?;
            CombinedLogger::init(vec![
                term,
                WriteLogger::new(log_level, Config::default(), file),
            ])
            .context("Failed to initialize combined file/terminal logging")?;
        }
        None => {
            CombinedLogger::init(vec![term]).context("Failed to initialize terminal logging")?;
        }
    }
    Ok(())
}

/// Print events until the channel closes. Finished code blocks are passed
/// on to `done_tx` by message ID; a dead kernel is passed on as None.
async fn print_events(
    event_rx: async_channel::Receiver<KernelEvent>,
    done_tx: async_channel::Sender<Option<String>>,
) {
    while let Ok(event) = event_rx.recv().await {
        match serde_json::to_string(&event) {
            Ok(line) => println!("{}", line),
            Err(err) => log::error!("Failed to serialize event: {}", err),
        }
        let done = match event {
            KernelEvent::CodeBlockStatus {
                message_id,
                status: ExecutionState::Idle,
                ..
            } => Some(Some(message_id)),
            KernelEvent::LaunchError { .. } => Some(None),
            _ => None,
        };
        if let Some(done) = done {
            let _ = done_tx.send(done).await;
        }
    }
}

/// Run one block of code and wait for the kernel to finish with it.
async fn run_code(
    manager: &KernelSessionManager,
    language: &str,
    code: &str,
    done_rx: &async_channel::Receiver<Option<String>>,
) -> anyhow::Result<()> {
    let msg_id = manager
        .execute(language, &make_message_id(), code)
        .await?;
    log::debug!("Waiting for {} to finish", msg_id);
    while let Ok(done) = done_rx.recv().await {
        match done {
            Some(done) if done == msg_id => break,
            Some(_) => continue,
            None => anyhow::bail!("The {} kernel exited while running code", language),
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(&args)?;

    let mut config = SessionConfig::new(args.project.clone());
    if args.verify_signatures {
        config.signature_policy = SignaturePolicy::Verify;
    }
    let grace = Duration::from_secs(args.shutdown_timeout);
    config.shutdown_grace = grace;

    let (event_tx, event_rx) = async_channel::unbounded();
    let (done_tx, done_rx) = async_channel::unbounded();
    let printer = tokio::spawn(print_events(event_rx, done_tx));

    let manager = KernelSessionManager::new(config, event_tx);
    let language = args.language.as_str();
    let venv = match (&args.venv, language) {
        (None, "python") => match python_virtual_environments(&args.project, &[]) {
            Ok(found) => {
                log::debug!("Virtual environments in the project: {:?}", found);
                found.into_iter().next()
            }
            Err(err) => {
                log::debug!("No virtual environments found: {}", err);
                None
            }
        },
        (venv, _) => venv.clone(),
    };
    manager
        .start(language, venv.as_deref())
        .await
        .with_context(|| format!("Failed to start {} kernel", language))?;

    if args.code.is_empty() {
        let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            run_code(&manager, language, &line, &done_rx).await?;
        }
    } else {
        for code in &args.code {
            run_code(&manager, language, code, &done_rx).await?;
        }
    }

    let shutdown_id = make_message_id();
    let shutdown = manager.shutdown(language, &shutdown_id, false);
    if let Err(err) = shutdown.await {
        log::warn!("Could not ask the kernel to shut down: {}", err);
    }
    if !manager.wait_stopped(language, grace).await {
        log::warn!("Kernel did not shut down in time; closing its sockets");
    }
    manager.reset(language).await;

    // Dropping the manager closes the event channel and ends the printer,
    // unless a kernel process is still winding down.
    drop(manager);
    let _ = tokio::time::timeout(grace, printer).await;
    Ok(())
}
