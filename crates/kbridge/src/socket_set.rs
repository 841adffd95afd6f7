//
// socket_set.rs
//
// Copyright (C) 2024-2025 Posit Software, PBC. All rights reserved.
// Licensed under the MIT License. See LICENSE.txt for license information.
//
//

use std::sync::Arc;

use async_channel::Sender;
use kbshared::jupyter_message::JupyterChannel;

use crate::{
    channels::{ControlHandler, IOPubHandler, ShellHandler, StdinHandler},
    config::HeartbeatConfig,
    connection_file::ConnectionFile,
    error::KBError,
    heartbeat::{HeartbeatMonitor, SharedHeartbeat},
    listener::{run_listener, ListenerContext},
    requests::Request,
    socket::{FrameSocket, SocketFactory},
    wire_message::WireMessage,
};

/// A socket held by a running listener. The socket itself belongs to the
/// listener task; this is how the rest of the session reaches it.
pub struct SocketHandle {
    pub role: JupyterChannel,

    /// Frames to send on the socket; None for the heartbeat, which sends
    /// only its own pings
    outbound: Option<Sender<WireMessage>>,
}

/// The five sockets of a kernel session.
#[derive(Default)]
pub struct KernelSockets {
    pub shell: Option<SocketHandle>,
    pub iopub: Option<SocketHandle>,
    pub control: Option<SocketHandle>,
    pub stdin: Option<SocketHandle>,
    pub heartbeat: Option<SocketHandle>,
}

/// What the listeners need beyond the shared context.
pub struct SocketSetOptions {
    pub heartbeat: HeartbeatConfig,
    pub heartbeat_state: SharedHeartbeat,
    pub shutdown_on_shell: bool,
}

impl KernelSockets {
    fn slot(&mut self, role: JupyterChannel) -> &mut Option<SocketHandle> {
        match role {
            JupyterChannel::Shell => &mut self.shell,
            JupyterChannel::IOPub => &mut self.iopub,
            JupyterChannel::Control => &mut self.control,
            JupyterChannel::Stdin => &mut self.stdin,
            JupyterChannel::Heartbeat => &mut self.heartbeat,
        }
    }

    fn get(&self, role: JupyterChannel) -> Option<&SocketHandle> {
        match role {
            JupyterChannel::Shell => self.shell.as_ref(),
            JupyterChannel::IOPub => self.iopub.as_ref(),
            JupyterChannel::Control => self.control.as_ref(),
            JupyterChannel::Stdin => self.stdin.as_ref(),
            JupyterChannel::Heartbeat => self.heartbeat.as_ref(),
        }
    }

    /// Whether all five sockets are held.
    pub fn is_complete(&self) -> bool {
        JupyterChannel::ALL
            .iter()
            .all(|role| self.get(*role).is_some())
    }

    /// Make sure every socket exists. Sockets already held are reused;
    /// missing ones are opened, connected, and given a listener. Returns how
    /// many sockets were opened.
    ///
    /// # Arguments
    ///
    /// - `factory`: Opens the sockets
    /// - `connection_file`: Where to connect
    /// - `ctx`: Shared by every listener started here
    /// - `options`: Heartbeat settings and shell shutdown routing
    pub async fn ensure_sockets(
        &mut self,
        factory: Arc<dyn SocketFactory>,
        connection_file: &ConnectionFile,
        ctx: &ListenerContext,
        options: &SocketSetOptions,
    ) -> Result<usize, KBError> {
        let mut opened = 0;
        for role in JupyterChannel::ALL {
            if self.get(role).is_some() {
                log::trace!("[kernel {}] Reusing {} socket", ctx.language, role);
                continue;
            }
            let endpoint = connection_file.channel_endpoint(role);
            let socket = Self::open(factory.as_ref(), role, &endpoint, ctx).await?;
            log::debug!(
                "[kernel {}] Created {} socket at {}",
                ctx.language,
                role,
                endpoint
            );

            let handle = Self::start_listener(
                role,
                socket,
                ctx,
                options,
                factory.clone(),
                endpoint,
            );
            *self.slot(role) = Some(handle);
            opened += 1;
        }
        Ok(opened)
    }

    /// Open a socket, giving up if the session is cancelled first (e.g. the
    /// kernel process exited before it started listening).
    async fn open(
        factory: &dyn SocketFactory,
        role: JupyterChannel,
        endpoint: &str,
        ctx: &ListenerContext,
    ) -> Result<Box<dyn FrameSocket>, KBError> {
        let token = ctx.shutdown.token();
        tokio::select! {
            biased;
            _ = token.cancelled() => Err(KBError::SocketConnect {
                role,
                endpoint: endpoint.to_string(),
                reason: String::from("session ended before the socket connected"),
            }),
            result = factory.open(role, endpoint, &ctx.connection.session_id) => result,
        }
    }

    fn start_listener(
        role: JupyterChannel,
        socket: Box<dyn FrameSocket>,
        ctx: &ListenerContext,
        options: &SocketSetOptions,
        factory: Arc<dyn SocketFactory>,
        endpoint: String,
    ) -> SocketHandle {
        let ctx = ctx.clone();
        let shutdown = ctx.shutdown.clone();

        if role == JupyterChannel::Heartbeat {
            let monitor = HeartbeatMonitor::new(
                ctx,
                options.heartbeat.clone(),
                options.heartbeat_state.clone(),
                factory,
                endpoint,
            );
            shutdown.spawn(monitor.run(socket));
            return SocketHandle {
                role,
                outbound: None,
            };
        }

        let (tx, rx) = async_channel::unbounded();
        match role {
            JupyterChannel::Shell => {
                shutdown.spawn(run_listener(
                    ShellHandler::new(options.shutdown_on_shell),
                    socket,
                    rx,
                    ctx,
                ));
            }
            JupyterChannel::IOPub => {
                shutdown.spawn(run_listener(IOPubHandler::new(), socket, rx, ctx));
            }
            JupyterChannel::Control => {
                shutdown.spawn(run_listener(ControlHandler::new(), socket, rx, ctx));
            }
            JupyterChannel::Stdin => {
                shutdown.spawn(run_listener(StdinHandler::new(), socket, rx, ctx));
            }
            JupyterChannel::Heartbeat => {}
        }
        SocketHandle {
            role,
            outbound: Some(tx),
        }
    }

    /// Sign a request and hand it to the listener that owns its channel.
    /// Returns the request's message ID.
    pub async fn send_request(
        &self,
        ctx: &ListenerContext,
        request: Request,
    ) -> Result<String, KBError> {
        let role = request.channel;
        let outbound = self
            .get(role)
            .and_then(|handle| handle.outbound.as_ref())
            .ok_or_else(|| KBError::Send {
                role,
                reason: String::from("socket is not open"),
            })?;
        let wire = ctx.connection.encode(&request.message)?;
        outbound.send(wire).await.map_err(|_| KBError::Send {
            role,
            reason: String::from("listener has exited"),
        })?;
        log::debug!(
            "[kernel {}] Sent {} ({}) on {}",
            ctx.language,
            request.msg_type(),
            request.msg_id(),
            role
        );
        Ok(request.message.header.msg_id)
    }
}
