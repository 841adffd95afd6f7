//
// session_manager.rs
//
// Copyright (C) 2024-2025 Posit Software, PBC. All rights reserved.
// Licensed under the MIT License. See LICENSE.txt for license information.
//
//

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_channel::Sender;
use kbshared::{kernel_message::KernelEvent, port_picker::is_port_in_use};
use tokio::sync::Mutex;

use crate::{
    config::SessionConfig,
    connection_file::is_supported_language,
    error::KBError,
    kernel_session::{environment::is_virtual_env, make_message_id, KernelSession},
    requests,
    shutdown::SessionPhase,
    socket::{SocketFactory, ZmqSocketFactory},
};

type SessionRef = Arc<Mutex<KernelSession>>;

/// Owns the kernel sessions of the application, at most one per language.
/// Everything that runs, interrupts, or shuts down kernels goes through it.
pub struct KernelSessionManager {
    config: SessionConfig,
    event_tx: Sender<KernelEvent>,
    factory: Arc<dyn SocketFactory>,
    sessions: Mutex<HashMap<String, SessionRef>>,

    /// The virtual environment each language was last started with, so that
    /// a kernel can be brought back when code is run after it died
    venvs: Mutex<HashMap<String, PathBuf>>,
}

impl KernelSessionManager {
    /// Create a manager that talks to kernels over ZeroMQ.
    pub fn new(config: SessionConfig, event_tx: Sender<KernelEvent>) -> Self {
        let factory = Arc::new(ZmqSocketFactory::new(config.connect_timeout));
        Self::with_factory(config, event_tx, factory)
    }

    pub fn with_factory(
        config: SessionConfig,
        event_tx: Sender<KernelEvent>,
        factory: Arc<dyn SocketFactory>,
    ) -> Self {
        Self {
            config,
            event_tx,
            factory,
            sessions: Mutex::new(HashMap::new()),
            venvs: Mutex::new(HashMap::new()),
        }
    }

    async fn session(&self, language: &str) -> Option<SessionRef> {
        self.sessions.lock().await.get(language).cloned()
    }

    /// The session for a language, if its kernel is answering heartbeats.
    async fn running_session(&self, language: &str) -> Result<SessionRef, KBError> {
        if let Some(session) = self.session(language).await {
            let alive = {
                let session = session.lock().await;
                session.phase() == SessionPhase::Running && session.heartbeat_status().await
            };
            if alive {
                return Ok(session);
            }
        }
        Err(KBError::SessionNotRunning(language.to_string()))
    }

    /// Start a kernel for a language, or finish starting the one that is
    /// already there. Safe to call repeatedly: a running session is reused
    /// and only its missing sockets are created.
    ///
    /// # Arguments
    ///
    /// - `language`: The kernel language, e.g. `python`
    /// - `venv`: The virtual environment to run Python in; required for
    ///   Python and ignored otherwise
    pub async fn start(&self, language: &str, venv: Option<&Path>) -> Result<(), KBError> {
        if !is_supported_language(language) {
            return Err(KBError::UnsupportedLanguage(language.to_string()));
        }
        let venv = self.resolve_venv(language, venv).await?;

        let (session, created) = loop {
            let mut sessions = self.sessions.lock().await;
            if let Some(existing) = sessions.get(language).cloned() {
                let (phase, coordinator) = {
                    let existing = existing.lock().await;
                    (existing.phase(), existing.shutdown_coordinator().clone())
                };
                match phase {
                    SessionPhase::Running => break (existing, false),
                    SessionPhase::ShuttingDown => {
                        // Its listeners still hold the ports; a new socket
                        // set must wait for them to let go.
                        drop(sessions);
                        log::info!(
                            "[kernel {}] Waiting for the previous session to stop",
                            language
                        );
                        let grace = self.config.shutdown_grace;
                        if !coordinator.wait_stopped(grace).await {
                            return Err(KBError::SessionStillStopping {
                                language: language.to_string(),
                                waited: grace,
                            });
                        }
                        continue;
                    }
                    SessionPhase::Stopped => {}
                }
            }

            // Any previous session for this language has ended; replace it.
            let session = Arc::new(Mutex::new(KernelSession::new(
                language,
                &self.config,
                self.event_tx.clone(),
            )?));
            sessions.insert(language.to_string(), session.clone());
            break (session, true);
        };

        let mut session = session.lock().await;
        let mut reconnecting = false;
        if created {
            let ip = session.connection_file.ip.clone();
            let port = session.connection_file.shell_port;
            let in_use = tokio::task::spawn_blocking(move || is_port_in_use(&ip, port))
                .await
                .unwrap_or(false);
            if in_use {
                reconnecting = true;
                // A kernel from an earlier run still holds the ports; talk to
                // it rather than starting another.
                log::info!(
                    "[kernel {}] Port {} is in use; connecting to the running kernel",
                    language,
                    port
                );
            } else {
                let launched = session.launch(venv.as_deref(), self.config.resource_dir.as_deref());
                if let Err(err) = launched {
                    err.log();
                    session
                        .shutdown_coordinator()
                        .request_shutdown("kernel failed to launch");
                    self.emit(KernelEvent::LaunchError {
                        language: language.to_string(),
                        data: err.to_string(),
                    })
                    .await;
                    return Err(err);
                }
            }
        }

        let opened = match session
            .ensure_sockets(self.factory.clone(), &self.config)
            .await
        {
            Ok(opened) => opened,
            Err(err) if reconnecting => {
                // Whatever holds the ports isn't a kernel we can talk to
                err.log();
                session
                    .shutdown_coordinator()
                    .request_shutdown("ports held by another process");
                return Err(KBError::PortInUse {
                    port: session.connection_file.shell_port,
                });
            }
            Err(err) => return Err(err),
        };
        if created || opened > 0 {
            log::info!("[kernel {}] Kernel session ready ({} sockets opened)", language, opened);
            self.emit(KernelEvent::LaunchSuccess {
                language: language.to_string(),
            })
            .await;
        }
        Ok(())
    }

    async fn resolve_venv(
        &self,
        language: &str,
        venv: Option<&Path>,
    ) -> Result<Option<PathBuf>, KBError> {
        let mut venvs = self.venvs.lock().await;
        let venv = match venv {
            Some(venv) => Some(venv.to_path_buf()),
            None => venvs.get(language).cloned(),
        };
        if language != "python" {
            return Ok(venv);
        }
        match venv {
            Some(venv) if is_virtual_env(&venv) => {
                venvs.insert(language.to_string(), venv.clone());
                Ok(Some(venv))
            }
            Some(venv) => Err(KBError::ExecutableNotFound {
                language: language.to_string(),
                path: format!("{} is not a virtual environment", venv.display()),
            }),
            None => Err(KBError::ExecutableNotFound {
                language: language.to_string(),
                path: String::from("no virtual environment selected"),
            }),
        }
    }

    /// Run code, starting the kernel first if it isn't answering heartbeats.
    /// Returns the ID the request was sent with (`msg_id` stamped with the
    /// send time); every event about the run carries it.
    pub async fn execute(
        &self,
        language: &str,
        msg_id: &str,
        code: &str,
    ) -> Result<String, KBError> {
        if !self.heartbeat_status(language).await {
            log::info!("[kernel {}] No heartbeat; starting kernel before executing", language);
            self.start(language, None).await?;
        }
        let session = self
            .session(language)
            .await
            .ok_or_else(|| KBError::SessionNotRunning(language.to_string()))?;
        let session = session.lock().await;
        let request = requests::execute_request(session.connection(), msg_id, code);
        session.send(request).await
    }

    pub async fn interrupt(&self, language: &str, msg_id: &str) -> Result<String, KBError> {
        let session = self.running_session(language).await?;
        let session = session.lock().await;
        let request = requests::interrupt_request(session.connection(), msg_id);
        session.send(request).await
    }

    /// Answer the kernel's pending `input_request`.
    pub async fn input_reply(
        &self,
        language: &str,
        msg_id: &str,
        value: &str,
    ) -> Result<String, KBError> {
        let session = self.running_session(language).await?;
        let session = session.lock().await;
        let request = requests::input_reply(session.connection(), msg_id, value);
        session.send(request).await
    }

    pub async fn complete(
        &self,
        language: &str,
        msg_id: &str,
        code: &str,
        cursor_pos: usize,
    ) -> Result<String, KBError> {
        let session = self.running_session(language).await?;
        let session = session.lock().await;
        let request = requests::complete_request(session.connection(), msg_id, code, cursor_pos);
        session.send(request).await
    }

    pub async fn inspect(
        &self,
        language: &str,
        msg_id: &str,
        code: &str,
        cursor_pos: usize,
        detail_level: u8,
    ) -> Result<String, KBError> {
        let session = self.running_session(language).await?;
        let session = session.lock().await;
        let request = requests::inspect_request(
            session.connection(),
            msg_id,
            code,
            cursor_pos,
            detail_level,
        );
        session.send(request).await
    }

    /// Ask the kernel to shut down. The session ends once the kernel reports
    /// itself idle after the request.
    pub async fn shutdown(
        &self,
        language: &str,
        msg_id: &str,
        restart: bool,
    ) -> Result<String, KBError> {
        let session = self.running_session(language).await?;
        let session = session.lock().await;
        let request = requests::shutdown_request(session.connection(), msg_id, restart);
        session.send(request).await
    }

    /// Restart a language's kernel: ask it to shut down, wait for it to go,
    /// and start a new one in the same virtual environment.
    pub async fn restart(&self, language: &str) -> Result<(), KBError> {
        self.shutdown(language, &make_message_id(), true).await?;
        let session = self
            .session(language)
            .await
            .ok_or_else(|| KBError::SessionNotRunning(language.to_string()))?;
        let (exit, launched, coordinator) = {
            let session = session.lock().await;
            (
                session.exit.clone(),
                session.launched(),
                session.shutdown_coordinator().clone(),
            )
        };

        let grace = self.config.shutdown_grace;
        if launched {
            if !exit.wait(grace).await {
                log::warn!(
                    "[kernel {}] Kernel still running {:?} after shutdown request",
                    language,
                    grace
                );
            }
        } else {
            // Not our process; the kernel going idle ends the session
            coordinator.wait_stopped(grace).await;
        }
        coordinator.request_shutdown("restart");
        coordinator.wait_stopped(grace).await;
        {
            let mut sessions = self.sessions.lock().await;
            if sessions
                .get(language)
                .is_some_and(|current| Arc::ptr_eq(current, &session))
            {
                sessions.remove(language);
            }
        }

        log::info!("[kernel {}] Restarting kernel", language);
        self.start(language, None).await
    }

    /// End a language's session without waiting for the kernel, and forget
    /// it. Returns whether its listeners stopped within the grace period.
    pub async fn reset(&self, language: &str) -> bool {
        let session = match self.sessions.lock().await.remove(language) {
            Some(session) => session,
            None => return true,
        };
        let coordinator = session.lock().await.shutdown_coordinator().clone();
        coordinator.request_shutdown("session reset");
        coordinator.wait_stopped(self.config.shutdown_grace).await
    }

    /// Whether a language's kernel is up and answering heartbeats.
    pub async fn is_kernel_available(&self, language: &str) -> bool {
        self.running_session(language).await.is_ok()
    }

    pub async fn heartbeat_status(&self, language: &str) -> bool {
        match self.session(language).await {
            Some(session) => session.lock().await.heartbeat_status().await,
            None => false,
        }
    }

    /// The phase of a language's session, if there is one.
    pub async fn phase(&self, language: &str) -> Option<SessionPhase> {
        match self.session(language).await {
            Some(session) => Some(session.lock().await.phase()),
            None => None,
        }
    }

    /// Wait for a language's session to stop, for at most `grace`. A
    /// stopped session is released, so the next start creates a new one.
    pub async fn wait_stopped(&self, language: &str, grace: Duration) -> bool {
        let session = match self.session(language).await {
            Some(session) => session,
            None => return true,
        };
        let coordinator = session.lock().await.shutdown_coordinator().clone();
        let stopped = coordinator.wait_stopped(grace).await;
        if stopped && coordinator.is_shutdown_requested() {
            let mut sessions = self.sessions.lock().await;
            if sessions
                .get(language)
                .is_some_and(|current| Arc::ptr_eq(current, &session))
            {
                sessions.remove(language);
            }
        }
        stopped
    }

    async fn emit(&self, event: KernelEvent) {
        if self.event_tx.send(event).await.is_err() {
            log::trace!("Dropping kernel event; no receiver");
        }
    }
}
