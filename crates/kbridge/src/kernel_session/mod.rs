//
// mod.rs
//
// Copyright (C) 2024-2025 Posit Software, PBC. All rights reserved.
// Licensed under the MIT License. See LICENSE.txt for license information.
//
//

//! Wraps Jupyter kernel sessions.

pub mod environment;
pub mod process;
pub mod utils;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_channel::Sender;
use kbshared::kernel_message::KernelEvent;
use tokio::sync::RwLock;

use crate::{
    config::SessionConfig,
    connection_file::ConnectionFile,
    error::KBError,
    heartbeat::{HeartbeatState, SharedHeartbeat},
    kernel_connection::KernelConnection,
    kernel_spec::KernelSpec,
    listener::ListenerContext,
    requests::Request,
    shutdown::{SessionPhase, ShutdownCoordinator},
    socket::SocketFactory,
    socket_set::{KernelSockets, SocketSetOptions},
};

use environment::{spec_actions, venv_actions};
use process::{ExitSignal, KernelEnvironment, ProcessMonitor};

// Re-export utility functions for external use
pub use utils::make_message_id;

/// A Jupyter kernel session: the connection file, the kernel process, the
/// five sockets, and the token that ends them all.
pub struct KernelSession {
    /// The kernel's language; one session per language
    pub language: String,

    /// The ports and key the kernel was (or will be) started with
    pub connection_file: ConnectionFile,

    /// Where the connection file lives
    pub connection_file_path: PathBuf,

    /// How to start the kernel
    pub spec: KernelSpec,

    /// The kernel's process ID, if we started it
    pub pid: Option<u32>,

    /// The five sockets, once created
    pub sockets: KernelSockets,

    /// Whether the kernel answered its last heartbeat
    pub heartbeat: SharedHeartbeat,

    /// Fires when the kernel process exits
    pub exit: ExitSignal,

    /// Shared by every listener of this session
    ctx: ListenerContext,
}

impl KernelSession {
    /// Create a session for a language, reading (or creating) its kernel
    /// spec and connection file. Nothing is started yet.
    pub fn new(
        language: &str,
        config: &SessionConfig,
        event_tx: Sender<KernelEvent>,
    ) -> Result<Self, KBError> {
        let connection_file = ConnectionFile::read_or_create(&config.project_path, language)?;
        let connection_file_path = ConnectionFile::path_for(&config.project_path, language);
        let spec = KernelSpec::read_or_create(&config.project_path, language)?;
        let connection = KernelConnection::new(
            &connection_file,
            config.username.clone(),
            config.signature_policy,
        );
        log::debug!(
            "[kernel {}] New session {} (shell port {})",
            language,
            connection.session_id,
            connection_file.shell_port
        );

        let ctx = ListenerContext {
            language: language.to_string(),
            connection,
            shutdown: ShutdownCoordinator::new(language),
            event_tx,
            poll_interval: config.poll_interval,
        };

        Ok(Self {
            language: language.to_string(),
            connection_file,
            connection_file_path,
            spec,
            pid: None,
            sockets: KernelSockets::default(),
            heartbeat: Arc::new(RwLock::new(HeartbeatState::default())),
            exit: ExitSignal::default(),
            ctx,
        })
    }

    pub fn connection(&self) -> &KernelConnection {
        &self.ctx.connection
    }

    pub fn shutdown_coordinator(&self) -> &ShutdownCoordinator {
        &self.ctx.shutdown
    }

    /// Whether we started the kernel process (rather than connecting to one
    /// left running by an earlier run).
    pub fn launched(&self) -> bool {
        self.pid.is_some()
    }

    pub fn phase(&self) -> SessionPhase {
        self.ctx.shutdown.phase()
    }

    /// Start the kernel process.
    ///
    /// # Arguments
    ///
    /// - `venv`: The virtual environment to run a Python kernel in
    /// - `resource_dir`: Substituted for `{resource_dir}` in argv
    pub fn launch(&mut self, venv: Option<&Path>, resource_dir: Option<&Path>) -> Result<(), KBError> {
        let mut var_actions = Vec::new();
        if let Some(venv) = venv {
            var_actions.extend(venv_actions(venv));
        }
        var_actions.extend(spec_actions(&self.spec));

        let environment = KernelEnvironment {
            venv: venv.map(Path::to_path_buf),
            resource_dir: resource_dir.map(Path::to_path_buf),
            var_actions,
        };
        let monitor = ProcessMonitor::new(
            &self.language,
            self.ctx.shutdown.clone(),
            self.exit.clone(),
            self.ctx.event_tx.clone(),
        );
        self.pid = monitor.launch(&self.spec.argv, &self.connection_file_path, &environment)?;
        Ok(())
    }

    /// Create whichever sockets the session doesn't have yet and start their
    /// listeners. Returns how many were created.
    pub async fn ensure_sockets(
        &mut self,
        factory: Arc<dyn SocketFactory>,
        config: &SessionConfig,
    ) -> Result<usize, KBError> {
        let options = SocketSetOptions {
            heartbeat: config.heartbeat.clone(),
            heartbeat_state: self.heartbeat.clone(),
            shutdown_on_shell: self.spec.shutdown_on_shell,
        };
        self.sockets
            .ensure_sockets(factory, &self.connection_file, &self.ctx, &options)
            .await
    }

    /// Send a request on its channel, returning its message ID.
    pub async fn send(&self, request: Request) -> Result<String, KBError> {
        self.sockets.send_request(&self.ctx, request).await
    }

    pub async fn heartbeat_status(&self) -> bool {
        self.heartbeat.read().await.status
    }
}
