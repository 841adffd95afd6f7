//
// control.rs
//
// Copyright (C) 2024-2025 Posit Software, PBC. All rights reserved.
// Licensed under the MIT License. See LICENSE.txt for license information.
//
//

use kbshared::{
    jupyter_message::{JupyterChannel, JupyterMessage},
    kernel_message::{KernelEvent, ReplyStatus, ShutdownStatus},
};

use crate::{
    jupyter_messages::JupyterMsg,
    kernel_session::make_message_id,
    listener::{ChannelHandler, ListenerContext},
    requests::shutdown_request,
    socket::FrameSocket,
};

/// Handles shutdown and interrupt replies. On the way out it sends the
/// kernel the final shutdown request.
#[derive(Default)]
pub struct ControlHandler;

impl ControlHandler {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl ChannelHandler for ControlHandler {
    fn role(&self) -> JupyterChannel {
        JupyterChannel::Control
    }

    fn handle(&mut self, msg: &JupyterMessage, ctx: &ListenerContext) -> Vec<KernelEvent> {
        match JupyterMsg::from(msg) {
            JupyterMsg::ShutdownReply(reply) => {
                if reply.status == ReplyStatus::Ok {
                    // Shutdown completes when iopub reports the kernel idle
                    log::debug!(
                        "[kernel {}] Kernel accepted shutdown (restart: {})",
                        ctx.language,
                        reply.restart
                    );
                    Vec::new()
                } else {
                    log::warn!(
                        "[kernel {}] Kernel refused shutdown: {:?}",
                        ctx.language,
                        reply.status
                    );
                    vec![KernelEvent::ShutdownReply {
                        language: ctx.language.clone(),
                        status: ShutdownStatus::Error,
                    }]
                }
            }
            JupyterMsg::InterruptReply(reply) => {
                log::info!(
                    "[kernel {}] Interrupt reply: {:?}",
                    ctx.language,
                    reply.status
                );
                vec![KernelEvent::InterruptReply {
                    language: ctx.language.clone(),
                    status: reply.status,
                }]
            }
            other => {
                log::debug!(
                    "[kernel {}] Ignoring control message {:?}",
                    ctx.language,
                    other
                );
                Vec::new()
            }
        }
    }

    async fn on_cancel(
        &mut self,
        ctx: &ListenerContext,
        socket: &mut dyn FrameSocket,
    ) -> Vec<KernelEvent> {
        // Make sure the kernel goes down with the session, however the
        // session ended.
        let request = shutdown_request(&ctx.connection, &make_message_id(), false);
        match ctx.connection.encode(&request.message) {
            Ok(wire) => {
                if let Err(err) = socket.send(wire).await {
                    err.log();
                }
            }
            Err(err) => err.log(),
        }
        vec![KernelEvent::ShutdownReply {
            language: ctx.language.clone(),
            status: ShutdownStatus::Success,
        }]
    }
}
