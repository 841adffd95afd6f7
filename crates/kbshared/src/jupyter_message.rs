//
// jupyter_message.rs
//
// Copyright (C) 2025 Posit Software, PBC. All rights reserved.
// Licensed under the MIT License. See LICENSE.txt for license information.
//
//

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The header of a Jupyter message.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct JupyterMessageHeader {
    /// The message ID; unique per request so replies can be correlated
    pub msg_id: String,

    /// The name of the user who sent the message
    #[serde(default)]
    pub username: String,

    /// The ID of the session that sent the message
    #[serde(default)]
    pub session: String,

    /// The type of the message
    pub msg_type: String,

    /// The version of the Jupyter protocol
    #[serde(default)]
    pub version: String,

    /// The date/time the message was created, in RFC 3339 format
    #[serde(default)]
    pub date: String,
}

/// The set of all Jupyter sockets ("channels") over which messages are sent and
/// received.
#[derive(Serialize, Deserialize, Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum JupyterChannel {
    /// The shell channel
    Shell,

    /// The iopub channel
    IOPub,

    /// The control channel
    Control,

    /// The stdin channel
    Stdin,

    /// The heartbeat channel
    Heartbeat,
}

impl JupyterChannel {
    /// All channels, in the order sockets are created for a session.
    pub const ALL: [JupyterChannel; 5] = [
        JupyterChannel::Shell,
        JupyterChannel::IOPub,
        JupyterChannel::Heartbeat,
        JupyterChannel::Control,
        JupyterChannel::Stdin,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JupyterChannel::Shell => "shell",
            JupyterChannel::IOPub => "iopub",
            JupyterChannel::Control => "control",
            JupyterChannel::Stdin => "stdin",
            JupyterChannel::Heartbeat => "heartbeat",
        }
    }
}

impl std::fmt::Display for JupyterChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decoded Jupyter message. The parent header, metadata, and content are
/// open JSON mappings; typed views of the content live in the bridge crate.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct JupyterMessage {
    /// The header of the message
    pub header: JupyterMessageHeader,

    /// The header of the message's parent (the message that caused this
    /// message); empty for requests
    pub parent_header: Map<String, Value>,

    /// Additional metadata
    pub metadata: Map<String, Value>,

    /// The message payload
    pub content: Map<String, Value>,
}

impl JupyterMessage {
    /// The `msg_id` of the parent message, if the parent header carries one.
    pub fn parent_msg_id(&self) -> Option<&str> {
        self.parent_header.get("msg_id").and_then(Value::as_str)
    }

    /// The `msg_type` of the parent message, if the parent header carries one.
    pub fn parent_msg_type(&self) -> Option<&str> {
        self.parent_header.get("msg_type").and_then(Value::as_str)
    }
}
