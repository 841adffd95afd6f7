//
// requests.rs
//
// Copyright (C) 2024-2025 Posit Software, PBC. All rights reserved.
// Licensed under the MIT License. See LICENSE.txt for license information.
//
//

//! Builders for the requests we send to kernels. Each one picks the channel
//! the request travels on. The caller supplies the message ID; replies are
//! matched up later by the listeners via `parent_header.msg_id`.

use kbshared::jupyter_message::{JupyterChannel, JupyterMessage};
use serde_json::json;

use crate::{
    kernel_connection::KernelConnection,
    kernel_session::utils::stamp_execution_id,
};

/// A request ready to be signed and sent.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    /// The channel the request is sent on
    pub channel: JupyterChannel,

    pub message: JupyterMessage,
}

impl Request {
    pub fn msg_id(&self) -> &str {
        &self.message.header.msg_id
    }

    pub fn msg_type(&self) -> &str {
        &self.message.header.msg_type
    }
}

/// Run code. The caller's message ID is suffixed with the send time, so the
/// duration can be reported when the kernel goes idle; the stamped ID is the
/// one replies refer to.
pub fn execute_request(connection: &KernelConnection, msg_id: &str, code: &str) -> Request {
    let msg_id = stamp_execution_id(msg_id, chrono::Utc::now());
    Request {
        channel: JupyterChannel::Shell,
        message: connection.request(
            msg_id,
            "execute_request",
            json!({
                "code": code,
                "silent": false,
                "store_history": true,
                "user_expressions": {},
                "allow_stdin": true,
                "stop_on_error": true,
            }),
        ),
    }
}

/// Ask for completions at `cursor_pos` (in unicode code points) in `code`.
pub fn complete_request(
    connection: &KernelConnection,
    msg_id: &str,
    code: &str,
    cursor_pos: usize,
) -> Request {
    Request {
        channel: JupyterChannel::Shell,
        message: connection.request(
            msg_id.to_string(),
            "complete_request",
            json!({
                "code": code,
                "cursor_pos": cursor_pos,
            }),
        ),
    }
}

/// Ask for documentation of the object at `cursor_pos`. A `detail_level` of
/// 1 asks for more detail (e.g. source) where the kernel supports it.
pub fn inspect_request(
    connection: &KernelConnection,
    msg_id: &str,
    code: &str,
    cursor_pos: usize,
    detail_level: u8,
) -> Request {
    Request {
        channel: JupyterChannel::Shell,
        message: connection.request(
            msg_id.to_string(),
            "inspect_request",
            json!({
                "code": code,
                "cursor_pos": cursor_pos,
                "detail_level": detail_level,
            }),
        ),
    }
}

pub fn shutdown_request(connection: &KernelConnection, msg_id: &str, restart: bool) -> Request {
    Request {
        channel: JupyterChannel::Control,
        message: connection.request(
            msg_id.to_string(),
            "shutdown_request",
            json!({ "restart": restart }),
        ),
    }
}

pub fn interrupt_request(connection: &KernelConnection, msg_id: &str) -> Request {
    Request {
        channel: JupyterChannel::Control,
        message: connection.request(msg_id.to_string(), "interrupt_request", json!({})),
    }
}

/// Answer an `input_request` from the kernel.
pub fn input_reply(connection: &KernelConnection, msg_id: &str, value: &str) -> Request {
    Request {
        channel: JupyterChannel::Stdin,
        message: connection.request(
            msg_id.to_string(),
            "input_reply",
            json!({ "value": value }),
        ),
    }
}
