//
// heartbeat.rs
//
// Copyright (C) 2024-2025 Posit Software, PBC. All rights reserved.
// Licensed under the MIT License. See LICENSE.txt for license information.
//
//

use std::sync::Arc;

use kbshared::{
    jupyter_message::JupyterChannel,
    kernel_message::{HeartbeatStatus, KernelEvent},
};
use tokio::sync::RwLock;
use tokio::time::{timeout, MissedTickBehavior};

use crate::{
    config::HeartbeatConfig, listener::ListenerContext, socket::FrameSocket,
    socket::SocketFactory, wire_message::WireMessage,
};

const HB_PAYLOAD: &[u8] = b"ping";

/// Whether the kernel answered its most recent heartbeat. Written only by
/// the heartbeat monitor; read by anyone.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatState {
    pub status: bool,
}

pub type SharedHeartbeat = Arc<RwLock<HeartbeatState>>;

/// A heartbeat monitor for a kernel session.
pub struct HeartbeatMonitor {
    ctx: ListenerContext,
    config: HeartbeatConfig,
    state: SharedHeartbeat,
    factory: Arc<dyn SocketFactory>,
    endpoint: String,
}

enum RoundTrip {
    Alive,
    Failed,
    Cancelled,
}

impl HeartbeatMonitor {
    /// Create a new heartbeat monitor.
    ///
    /// # Arguments
    ///
    /// - `ctx`: The session's listener context
    /// - `config`: Tick interval, receive timeout, and failure limit
    /// - `state`: The liveness flag this monitor owns
    /// - `factory`: Used to replace the socket after a failed round trip
    /// - `endpoint`: The address of the heartbeat socket
    pub fn new(
        ctx: ListenerContext,
        config: HeartbeatConfig,
        state: SharedHeartbeat,
        factory: Arc<dyn SocketFactory>,
        endpoint: String,
    ) -> Self {
        Self {
            ctx,
            config,
            state,
            factory,
            endpoint,
        }
    }

    /// Ping the kernel every tick until the session is cancelled.
    pub async fn run(self, socket: Box<dyn FrameSocket>) {
        let token = self.ctx.shutdown.token();
        let language = self.ctx.language.clone();
        let mut socket = Some(socket);
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut initial = true;
        let mut failures: u32 = 0;

        log::debug!("[kernel {}] Starting heartbeat monitor", language);
        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = ticker.tick() => {}
            }

            // A REQ socket that missed its reply can't send again, so a
            // failed socket is replaced before the next ping.
            if socket.is_none() {
                socket = tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    socket = self.reconnect() => socket,
                };
            }

            let result = match socket.as_mut() {
                Some(s) => self.round_trip(s.as_mut()).await,
                None => RoundTrip::Failed,
            };

            let alive = match result {
                RoundTrip::Cancelled => break,
                RoundTrip::Alive => {
                    failures = 0;
                    true
                }
                RoundTrip::Failed => {
                    failures += 1;
                    if let Some(mut failed) = socket.take() {
                        failed.close().await;
                    }
                    false
                }
            };

            self.record(alive, initial).await;
            initial = false;

            if failures >= self.config.max_consecutive_failures {
                log::error!(
                    "[kernel {}] No heartbeat after {} attempts; ending session",
                    language,
                    failures
                );
                self.ctx.shutdown.request_shutdown("heartbeat lost");
            }
        }

        if let Some(mut s) = socket {
            s.close().await;
        }
        log::debug!("[kernel {}] Stopping heartbeat monitor", language);
    }

    /// Send one ping and wait for the pong.
    async fn round_trip(&self, socket: &mut dyn FrameSocket) -> RoundTrip {
        let language = &self.ctx.language;
        log::trace!("[kernel {}] Sending heartbeat to kernel.", language);
        if let Err(err) = socket
            .send(WireMessage::from(vec![HB_PAYLOAD.to_vec()]))
            .await
        {
            log::warn!("[kernel {}] Could not send heartbeat: {}", language, err);
            return RoundTrip::Failed;
        }

        let token = self.ctx.shutdown.token();
        tokio::select! {
            biased;
            _ = token.cancelled() => RoundTrip::Cancelled,
            result = timeout(self.config.timeout, socket.recv()) => match result {
                Ok(Ok(_)) => RoundTrip::Alive,
                Ok(Err(err)) => {
                    log::warn!(
                        "[kernel {}] Error receiving heartbeat response: {}",
                        language,
                        err
                    );
                    RoundTrip::Failed
                }
                Err(_) => {
                    log::warn!(
                        "[kernel {}] No heartbeat response received after {:?}",
                        language,
                        self.config.timeout
                    );
                    RoundTrip::Failed
                }
            }
        }
    }

    async fn reconnect(&self) -> Option<Box<dyn FrameSocket>> {
        let open = self.factory.open(
            JupyterChannel::Heartbeat,
            &self.endpoint,
            &self.ctx.connection.session_id,
        );
        match timeout(self.config.timeout, open).await {
            Ok(Ok(socket)) => {
                log::debug!(
                    "[kernel {}] Reconnected heartbeat socket at {}",
                    self.ctx.language,
                    self.endpoint
                );
                Some(socket)
            }
            Ok(Err(err)) => {
                err.log();
                None
            }
            Err(_) => {
                log::warn!(
                    "[kernel {}] Timed out reconnecting heartbeat socket",
                    self.ctx.language
                );
                None
            }
        }
    }

    /// Write the result of a round trip, reporting it if it changed (or if
    /// it is the first one).
    async fn record(&self, alive: bool, initial: bool) {
        let changed = {
            let mut state = self.state.write().await;
            let changed = state.status != alive;
            state.status = alive;
            changed
        };
        if !(changed || initial) {
            return;
        }

        if alive {
            log::info!("[kernel {}] Kernel heartbeat detected", self.ctx.language);
        } else {
            log::warn!("[kernel {}] Kernel heartbeat lost", self.ctx.language);
        }
        self.ctx
            .emit(KernelEvent::Heartbeat {
                language: self.ctx.language.clone(),
                status: if alive {
                    HeartbeatStatus::Success
                } else {
                    HeartbeatStatus::Failure
                },
            })
            .await;
    }
}
