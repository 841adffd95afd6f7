//
// shell.rs
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
    listener::{ChannelHandler, ListenerContext},
};

use super::render_traceback;

/// Handles replies to execute, complete, and inspect requests.
pub struct ShellHandler {
    /// Whether this kernel sends its shutdown reply here instead of on the
    /// control socket
    shutdown_on_shell: bool,
}

impl ShellHandler {
    pub fn new(shutdown_on_shell: bool) -> Self {
        Self { shutdown_on_shell }
    }

    fn shutdown_reply(&self, status: ReplyStatus, ctx: &ListenerContext) -> Vec<KernelEvent> {
        if !self.shutdown_on_shell {
            log::debug!(
                "[kernel {}] Ignoring shutdown_reply on shell; waiting for control",
                ctx.language
            );
            return Vec::new();
        }
        if status == ReplyStatus::Ok {
            ctx.shutdown.request_shutdown("shutdown_reply received on shell");
            return Vec::new();
        }
        vec![KernelEvent::ShutdownReply {
            language: ctx.language.clone(),
            status: ShutdownStatus::Error,
        }]
    }
}

#[async_trait::async_trait]
impl ChannelHandler for ShellHandler {
    fn role(&self) -> JupyterChannel {
        JupyterChannel::Shell
    }

    fn handle(&mut self, msg: &JupyterMessage, ctx: &ListenerContext) -> Vec<KernelEvent> {
        let typed = JupyterMsg::from(msg);
        if let JupyterMsg::ShutdownReply(reply) = &typed {
            return self.shutdown_reply(reply.status, ctx);
        }

        // Everything else is a reply to one of our requests
        let message_id = match msg.parent_msg_id() {
            Some(id) => id.to_string(),
            None => {
                log::warn!(
                    "[kernel {}] Discarding {} with no parent msg_id",
                    ctx.language,
                    msg.header.msg_type
                );
                return Vec::new();
            }
        };

        match typed {
            JupyterMsg::ExecuteReply(reply) => {
                let (error_name, error_value, error_traceback) = match reply.status {
                    ReplyStatus::Error => (
                        reply.ename,
                        reply.evalue,
                        render_traceback(&reply.traceback),
                    ),
                    _ => (String::new(), String::new(), Vec::new()),
                };
                vec![KernelEvent::ExecuteReply {
                    message_id,
                    status: reply.status,
                    error_name,
                    error_value,
                    error_traceback,
                }]
            }
            JupyterMsg::CompleteReply(reply) => vec![KernelEvent::CompleteReply {
                message_id,
                status: reply.status,
                matches: reply.matches,
                cursor_start: reply.cursor_start,
                cursor_end: reply.cursor_end,
                metadata: reply.metadata,
            }],
            JupyterMsg::InspectReply(reply) => vec![KernelEvent::InspectReply {
                message_id,
                status: reply.status,
                found: reply.found,
                data: reply.data,
                metadata: reply.metadata,
            }],
            other => {
                log::debug!(
                    "[kernel {}] Ignoring shell message {:?}",
                    ctx.language,
                    other
                );
                Vec::new()
            }
        }
    }
}
