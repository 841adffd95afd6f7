//
// iopub.rs
//
// Copyright (C) 2024-2025 Posit Software, PBC. All rights reserved.
// Licensed under the MIT License. See LICENSE.txt for license information.
//
//

use kbshared::{
    jupyter_message::{JupyterChannel, JupyterMessage},
    kernel_message::{ExecutionState, KernelEvent},
};

use crate::{
    jupyter_messages::JupyterMsg,
    kernel_session::utils::execution_duration,
    listener::{ChannelHandler, ListenerContext},
};

use super::{render_ansi, render_traceback};

/// Handles output and status broadcast by the kernel.
#[derive(Default)]
pub struct IOPubHandler;

impl IOPubHandler {
    pub fn new() -> Self {
        Self
    }

    fn status(
        &self,
        msg: &JupyterMessage,
        message_id: String,
        state: ExecutionState,
        ctx: &ListenerContext,
    ) -> Vec<KernelEvent> {
        let mut events = vec![KernelEvent::KernelStatus {
            language: ctx.language.clone(),
            status: state,
        }];

        match msg.parent_msg_type() {
            Some("execute_request") => {
                let duration = match state {
                    ExecutionState::Idle => execution_duration(&message_id, chrono::Utc::now()),
                    _ => String::new(),
                };
                events.push(KernelEvent::CodeBlockStatus {
                    message_id,
                    status: state,
                    duration,
                });
            }
            Some("shutdown_request") if state == ExecutionState::Idle => {
                // The kernel has finished handling our shutdown request
                ctx.shutdown
                    .request_shutdown("kernel idle after shutdown_request");
            }
            _ => {}
        }
        events
    }
}

#[async_trait::async_trait]
impl ChannelHandler for IOPubHandler {
    fn role(&self) -> JupyterChannel {
        JupyterChannel::IOPub
    }

    fn handle(&mut self, msg: &JupyterMessage, ctx: &ListenerContext) -> Vec<KernelEvent> {
        // Broadcasts that aren't caused by one of our requests (e.g. the
        // initial `starting` status) can't be attributed to anything.
        let message_id = match msg.parent_msg_id() {
            Some(id) => id.to_string(),
            None => {
                log::trace!(
                    "[kernel {}] Skipping iopub {} with no parent msg_id",
                    ctx.language,
                    msg.header.msg_type
                );
                return Vec::new();
            }
        };

        match JupyterMsg::from(msg) {
            JupyterMsg::Stream(stream) => vec![KernelEvent::Stream {
                message_id,
                name: stream.name,
                text: render_ansi(&stream.text),
            }],
            JupyterMsg::ExecuteResult(bundle) => vec![KernelEvent::ExecuteResult {
                message_id,
                data: bundle.text_data(),
            }],
            JupyterMsg::DisplayData(bundle) => vec![KernelEvent::DisplayData {
                message_id,
                data: bundle.text_data(),
            }],
            JupyterMsg::ExecuteInput(input) => vec![KernelEvent::ExecuteInput {
                message_id,
                code: input.code,
                execution_count: input.execution_count,
            }],
            JupyterMsg::Error(error) => vec![KernelEvent::ExecutionError {
                message_id,
                name: error.ename,
                value: error.evalue,
                traceback: render_traceback(&error.traceback),
            }],
            JupyterMsg::Status(status) => {
                self.status(msg, message_id, status.execution_state, ctx)
            }
            other => {
                log::trace!(
                    "[kernel {}] Ignoring iopub message {:?}",
                    ctx.language,
                    other
                );
                Vec::new()
            }
        }
    }
}
