//
// process.rs
//
// Copyright (C) 2024-2025 Posit Software, PBC. All rights reserved.
// Licensed under the MIT License. See LICENSE.txt for license information.
//
//

//! Child process management for kernel sessions.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_channel::Sender;
use event_listener::Event;
use kbshared::kernel_message::KernelEvent;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::{error::KBError, shutdown::ShutdownCoordinator};

use super::environment::{resolve_argv, EnvironmentResolver, VarAction};
use super::utils::substitute_placeholders;

/// Where and how a kernel process runs, beyond its argv.
#[derive(Debug, Clone, Default)]
pub struct KernelEnvironment {
    /// The virtual environment whose interpreter runs the kernel (Python)
    pub venv: Option<PathBuf>,

    /// Substituted for `{resource_dir}` in argv
    pub resource_dir: Option<PathBuf>,

    /// Changes to our own environment for the kernel
    pub var_actions: Vec<VarAction>,
}

/// Fires once the kernel process has exited.
#[derive(Clone, Default)]
pub struct ExitSignal {
    inner: Arc<ExitInner>,
}

struct ExitInner {
    event: Event,
    exited: AtomicBool,
}

impl Default for ExitInner {
    fn default() -> Self {
        Self {
            event: Event::new(),
            exited: AtomicBool::new(false),
        }
    }
}

impl ExitSignal {
    fn notify(&self) {
        self.inner.exited.store(true, Ordering::SeqCst);
        self.inner.event.notify(usize::MAX);
    }

    pub fn has_exited(&self) -> bool {
        self.inner.exited.load(Ordering::SeqCst)
    }

    /// Wait for the process to exit, for at most `timeout`. Returns whether
    /// it did.
    pub async fn wait(&self, timeout: Duration) -> bool {
        // Listen before checking, so an exit in between isn't missed
        let listener = self.inner.event.listen();
        if self.has_exited() {
            return true;
        }
        tokio::time::timeout(timeout, listener).await.is_ok()
    }
}

/// Starts a kernel child process and watches it until it exits.
pub struct ProcessMonitor {
    /// The kernel's language, for logs and events
    language: String,

    /// Ends the session when the process exits
    shutdown: ShutdownCoordinator,

    /// Fires when the process exits
    exit: ExitSignal,

    event_tx: Sender<KernelEvent>,
}

impl ProcessMonitor {
    /// Create a new process monitor.
    pub fn new(
        language: &str,
        shutdown: ShutdownCoordinator,
        exit: ExitSignal,
        event_tx: Sender<KernelEvent>,
    ) -> Self {
        Self {
            language: language.to_string(),
            shutdown,
            exit,
            event_tx,
        }
    }

    /// Start the kernel. Returns as soon as the process has been spawned;
    /// a background task reports abnormal exits as `LaunchError` events.
    ///
    /// # Arguments
    ///
    /// - `argv`: The kernel's command line, with placeholders
    /// - `connection_file_path`: Substituted for `{connection_file}`
    /// - `environment`: Interpreter, resource directory, and variables
    ///
    /// Returns the process ID, if the OS reported one.
    pub fn launch(
        self,
        argv: &[String],
        connection_file_path: &Path,
        environment: &KernelEnvironment,
    ) -> Result<Option<u32>, KBError> {
        let argv = substitute_placeholders(
            argv,
            connection_file_path,
            environment.resource_dir.as_deref(),
        );
        let argv = resolve_argv(&self.language, &argv, environment.venv.as_deref())?;
        let resolved_env = EnvironmentResolver::new(environment.var_actions.clone()).resolve();

        log::info!("[kernel {}] Starting kernel: {:?}", self.language, argv);
        let mut command = tokio::process::Command::new(&argv[0]);
        command
            .args(&argv[1..])
            .env_clear()
            .envs(&resolved_env)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::piped());

        let mut child = command.spawn().map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                KBError::ExecutableNotFound {
                    language: self.language.clone(),
                    path: argv[0].clone(),
                }
            } else {
                KBError::Io {
                    path: argv[0].clone(),
                    source,
                }
            }
        })?;
        let pid = child.id();
        log::debug!("[kernel {}] Kernel process started (pid {:?})", self.language, pid);

        let captured = Arc::new(Mutex::new(String::new()));
        let tee = child
            .stderr
            .take()
            .map(|stderr| Self::tee_stderr(stderr, captured.clone()));

        tokio::spawn(async move {
            self.run_child(child, tee, captured).await;
        });
        Ok(pid)
    }

    /// Wait for the child to exit, then report and end the session.
    async fn run_child(
        self,
        mut child: tokio::process::Child,
        tee: Option<JoinHandle<()>>,
        captured: Arc<Mutex<String>>,
    ) {
        let (code, failure) = match child.wait().await {
            Ok(status) => {
                log::info!(
                    "[kernel {}] Kernel process exited with status: {}",
                    self.language,
                    status
                );
                let failure = if status.success() {
                    None
                } else {
                    Some(format!("Kernel process exited with status: {}", status))
                };
                (status.code(), failure)
            }
            Err(err) => {
                log::error!(
                    "[kernel {}] Failed to wait on kernel process: {}",
                    self.language,
                    err
                );
                (None, Some(format!("Failed to wait on kernel process: {}", err)))
            }
        };

        if let Some(failure) = failure {
            // Let the tee drain what the kernel wrote before it died
            if let Some(tee) = tee {
                let _ = tokio::time::timeout(Duration::from_secs(1), tee).await;
            }
            let output = captured.lock().await.clone();
            let data = if output.trim().is_empty() {
                failure
            } else {
                output
            };
            log::error!(
                "[kernel {}] Kernel exited abnormally (code {:?})",
                self.language,
                code
            );
            if self
                .event_tx
                .send(KernelEvent::LaunchError {
                    language: self.language.clone(),
                    data,
                })
                .await
                .is_err()
            {
                log::trace!("[kernel {}] No receiver for launch error", self.language);
            }
        }

        // Notify anyone listening that the kernel has exited
        self.exit.notify();
        self.shutdown.request_shutdown("kernel process exited");
    }

    /// Copy a child's stderr to our own, keeping a copy for diagnostics.
    ///
    /// # Arguments
    ///
    /// - `stream`: The stream to read from
    /// - `captured`: Where to keep the copy
    fn tee_stderr<T: AsyncRead + Unpin + Send + 'static>(
        stream: T,
        captured: Arc<Mutex<String>>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut reader = tokio::io::BufReader::new(stream);
            let mut stderr = tokio::io::stderr();
            let mut buffer = String::new();
            loop {
                buffer.clear();
                match reader.read_line(&mut buffer).await {
                    Ok(0) => {
                        log::trace!("End of kernel stderr");
                        break;
                    }
                    Ok(_) => {
                        if let Err(e) = stderr.write_all(buffer.as_bytes()).await {
                            log::debug!("Failed to forward kernel stderr: {}", e);
                        }
                        captured.lock().await.push_str(&buffer);
                    }
                    Err(e) => {
                        log::error!("Failed to read from kernel stderr: {}", e);
                        break;
                    }
                }
            }
        })
    }
}
