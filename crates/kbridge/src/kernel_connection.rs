//
// kernel_connection.rs
//
// Copyright (C) 2024 Posit Software, PBC. All rights reserved.
// Licensed under the MIT License. See LICENSE.txt for license information.
//
//

use kbshared::jupyter_message::{JupyterMessage, JupyterMessageHeader};
use serde_json::{Map, Value};

use crate::{
    connection_file::ConnectionFile,
    error::KBError,
    wire_message::{SignaturePolicy, WireMessage},
    wire_message_header::new_header,
};

/// Everything needed to sign, stamp, and check messages for one kernel
/// session.
#[derive(Debug, Clone)]
pub struct KernelConnection {
    /// The ID of the session; also the peer identity of the dealer sockets
    pub session_id: String,

    /// The username of the user who owns the session
    pub username: String,

    /// The signing key, as a string
    pub key: String,

    /// Whether incoming signatures are checked
    pub signature_policy: SignaturePolicy,
}

impl KernelConnection {
    pub fn new(
        connection_file: &ConnectionFile,
        username: String,
        signature_policy: SignaturePolicy,
    ) -> Self {
        Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            username,
            key: connection_file.key.clone(),
            signature_policy,
        }
    }

    /// Create a header for an outgoing message in this session.
    pub fn header(&self, msg_id: String, msg_type: &str) -> JupyterMessageHeader {
        new_header(msg_id, msg_type, &self.session_id, &self.username)
    }

    /// Create a request with no parent and no metadata.
    pub fn request(&self, msg_id: String, msg_type: &str, content: Value) -> JupyterMessage {
        let content = match content {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        JupyterMessage {
            header: self.header(msg_id, msg_type),
            parent_header: Map::new(),
            metadata: Map::new(),
            content,
        }
    }

    /// Sign and frame a message. Dealer sockets add their own routing
    /// identity, so no identities are placed before the delimiter.
    pub fn encode(&self, msg: &JupyterMessage) -> Result<WireMessage, KBError> {
        WireMessage::encode(&[], msg, &self.key)
    }

    /// Decode a message received from the kernel, checking its signature
    /// when the session asks for it.
    pub fn decode(&self, wire: &WireMessage) -> Result<JupyterMessage, KBError> {
        wire.decode_with_policy(&self.key, self.signature_policy)
            .map(|decoded| decoded.message)
    }
}
