//
// listener.rs
//
// Copyright (C) 2024-2025 Posit Software, PBC. All rights reserved.
// Licensed under the MIT License. See LICENSE.txt for license information.
//
//

use std::time::Duration;

use async_channel::{Receiver, Sender};
use async_trait::async_trait;
use kbshared::{
    jupyter_message::{JupyterChannel, JupyterMessage},
    kernel_message::KernelEvent,
};

use crate::{
    kernel_connection::KernelConnection, shutdown::ShutdownCoordinator, socket::FrameSocket,
    wire_message::WireMessage,
};

/// What every listener in a session shares.
#[derive(Clone)]
pub struct ListenerContext {
    /// The language of the kernel, for logs and language-scoped events
    pub language: String,

    /// Signs outgoing and decodes incoming messages
    pub connection: KernelConnection,

    /// Holds the session's cancellation token
    pub shutdown: ShutdownCoordinator,

    /// Where events for the client go
    pub event_tx: Sender<KernelEvent>,

    /// How long to back off after a receive error
    pub poll_interval: Duration,
}

impl ListenerContext {
    /// Send an event to the client. Events are fire-and-forget; if nobody is
    /// listening any more, the event is dropped.
    pub async fn emit(&self, event: KernelEvent) {
        if let Err(err) = self.event_tx.send(event).await {
            log::trace!(
                "[kernel {}] Dropping event; no receiver: {:?}",
                self.language,
                err.into_inner()
            );
        }
    }

    pub async fn emit_all(&self, events: Vec<KernelEvent>) {
        for event in events {
            self.emit(event).await;
        }
    }
}

/// The per-channel part of a listener: how decoded messages are turned into
/// events, and what to do on the way out.
#[async_trait]
pub trait ChannelHandler: Send {
    fn role(&self) -> JupyterChannel;

    /// React to one decoded message, returning the events to report.
    fn handle(&mut self, msg: &JupyterMessage, ctx: &ListenerContext) -> Vec<KernelEvent>;

    /// Called once after the session is cancelled, before the socket is
    /// closed.
    async fn on_cancel(
        &mut self,
        _ctx: &ListenerContext,
        _socket: &mut dyn FrameSocket,
    ) -> Vec<KernelEvent> {
        Vec::new()
    }
}

/// Decode a message and hand it to the handler. Messages that fail to decode
/// are logged and skipped.
pub async fn dispatch<H: ChannelHandler + ?Sized>(
    handler: &mut H,
    ctx: &ListenerContext,
    wire: &WireMessage,
) {
    let msg = match ctx.connection.decode(wire) {
        Ok(msg) => msg,
        Err(err) if err.is_message_error() => {
            log::warn!(
                "[kernel {}] Skipping message on {} socket: {}",
                ctx.language,
                handler.role(),
                err
            );
            return;
        }
        Err(err) => {
            err.log();
            return;
        }
    };
    log::trace!(
        "[kernel {}] {} message: {} (parent {:?})",
        ctx.language,
        handler.role(),
        msg.header.msg_type,
        msg.parent_msg_id()
    );
    let events = handler.handle(&msg, ctx);
    ctx.emit_all(events).await;
}

/// Run a listener until the session is cancelled or its outbound channel is
/// closed, then close its socket.
///
/// # Arguments
///
/// - `handler`: Decides what each message on this channel means
/// - `socket`: The socket to listen on; owned exclusively by this listener
/// - `outbound`: Messages to send on the socket
/// - `ctx`: The session's shared listener context
pub async fn run_listener<H: ChannelHandler>(
    mut handler: H,
    mut socket: Box<dyn FrameSocket>,
    outbound: Receiver<WireMessage>,
    ctx: ListenerContext,
) {
    let role = handler.role();
    let token = ctx.shutdown.token();
    log::debug!("[kernel {}] Starting {} listener", ctx.language, role);

    loop {
        tokio::select! {
            biased;

            _ = token.cancelled() => {
                log::debug!(
                    "[kernel {}] {} listener received cancellation",
                    ctx.language,
                    role
                );
                let events = handler.on_cancel(&ctx, socket.as_mut()).await;
                ctx.emit_all(events).await;
                break;
            }

            outgoing = outbound.recv() => {
                match outgoing {
                    Ok(msg) => {
                        if let Err(err) = socket.send(msg).await {
                            err.log();
                        }
                    }
                    Err(_) => {
                        log::debug!(
                            "[kernel {}] {} outbound channel closed",
                            ctx.language,
                            role
                        );
                        break;
                    }
                }
            }

            incoming = socket.recv() => {
                match incoming {
                    Ok(wire) => dispatch(&mut handler, &ctx, &wire).await,
                    Err(err) => {
                        log::trace!("[kernel {}] {}", ctx.language, err);
                        tokio::time::sleep(ctx.poll_interval).await;
                    }
                }
            }
        }
    }

    socket.close().await;
    log::debug!("[kernel {}] {} listener exited", ctx.language, role);
}
