//
// stdin.rs
//
// Copyright (C) 2024-2025 Posit Software, PBC. All rights reserved.
// Licensed under the MIT License. See LICENSE.txt for license information.
//
//

use kbshared::{
    jupyter_message::{JupyterChannel, JupyterMessage},
    kernel_message::KernelEvent,
};

use crate::{
    jupyter_messages::JupyterMsg,
    listener::{ChannelHandler, ListenerContext},
};

/// Forwards the kernel's requests for user input. The answer goes back
/// separately, as an `input_reply`.
#[derive(Default)]
pub struct StdinHandler;

impl StdinHandler {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl ChannelHandler for StdinHandler {
    fn role(&self) -> JupyterChannel {
        JupyterChannel::Stdin
    }

    fn handle(&mut self, msg: &JupyterMessage, ctx: &ListenerContext) -> Vec<KernelEvent> {
        match JupyterMsg::from(msg) {
            JupyterMsg::InputRequest(request) => vec![KernelEvent::InputRequest {
                message_id: msg.parent_msg_id().unwrap_or_default().to_string(),
                prompt: request.prompt,
                password: request.password,
            }],
            other => {
                log::debug!(
                    "[kernel {}] Ignoring stdin message {:?}",
                    ctx.language,
                    other
                );
                Vec::new()
            }
        }
    }
}
