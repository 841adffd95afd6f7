//
// wire_message.rs
//
// Copyright (C) 2024-2025 Posit Software, PBC. All rights reserved.
// Licensed under the MIT License. See LICENSE.txt for license information.
//
//

use bytes::Bytes;
use hmac::{Hmac, Mac};
use kbshared::jupyter_message::{JupyterMessage, JupyterMessageHeader};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use sha2::Sha256;
use zeromq::ZmqMessage;

use crate::error::{KBError, WireSection};

/// The frame separating routing identities from the signed message.
pub const DELIMITER: &[u8] = b"<IDS|MSG>";

/// Whether incoming signatures are checked.
///
/// The kernel and the bridge share a fixed local secret, so signatures are not
/// checked unless asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SignaturePolicy {
    #[default]
    Skip,
    Verify,
}

/// A Jupyter message as it appears on the wire: routing identities followed by
/// the delimiter, the signature, and the four JSON sections.
#[derive(Debug, Clone, PartialEq)]
pub struct WireMessage {
    /// The parts of the message, as an array of byte arrays
    pub parts: Vec<Vec<u8>>,
}

/// The pieces of a decoded wire message.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedMessage {
    pub identities: Vec<Vec<u8>>,
    pub message: JupyterMessage,
    pub signature: String,
}

/// Compute the hex-encoded HMAC-SHA256 signature of the given sections. An
/// empty key disables signing and produces an empty signature.
pub fn sign(key: &str, sections: &[&[u8]]) -> String {
    if key.is_empty() {
        return String::new();
    }
    // HMAC accepts keys of any length, so this cannot fail.
    let mut mac = match Hmac::<Sha256>::new_from_slice(key.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    for section in sections {
        mac.update(section);
    }
    hex::encode(mac.finalize().into_bytes())
}

fn encode_section<T: serde::Serialize>(
    section: WireSection,
    value: &T,
) -> Result<Vec<u8>, KBError> {
    serde_json::to_vec(value).map_err(|source| KBError::Encoding { section, source })
}

fn decode_section<T: DeserializeOwned>(section: WireSection, bytes: &[u8]) -> Result<T, KBError> {
    serde_json::from_slice(bytes).map_err(|source| KBError::Decoding { section, source })
}

impl WireMessage {
    /// Create a signed wire message from a Jupyter message.
    ///
    /// - `identities`: Routing identities to place before the delimiter
    /// - `msg`: The message to encode
    /// - `key`: The session's shared secret
    pub fn encode(
        identities: &[Vec<u8>],
        msg: &JupyterMessage,
        key: &str,
    ) -> Result<Self, KBError> {
        let header = encode_section(WireSection::Header, &msg.header)?;
        let parent_header = encode_section(WireSection::ParentHeader, &msg.parent_header)?;
        let metadata = encode_section(WireSection::Metadata, &msg.metadata)?;
        let content = encode_section(WireSection::Content, &msg.content)?;

        let signature = sign(key, &[&header, &parent_header, &metadata, &content]);

        let mut parts: Vec<Vec<u8>> = Vec::with_capacity(identities.len() + 6);
        parts.extend(identities.iter().cloned());
        parts.push(DELIMITER.to_vec());
        parts.push(signature.into_bytes());
        parts.push(header);
        parts.push(parent_header);
        parts.push(metadata);
        parts.push(content);

        Ok(WireMessage { parts })
    }

    /// Locate the delimiter frame.
    fn delimiter_index(&self) -> Result<usize, KBError> {
        let index = self
            .parts
            .iter()
            .position(|part| part.as_slice() == DELIMITER)
            .ok_or_else(|| KBError::Protocol(String::from("delimiter not found in message")))?;

        // Signature, header, parent header, metadata, content
        if self.parts.len() < index + 6 {
            return Err(KBError::Protocol(format!(
                "expected 5 frames after delimiter, found {}",
                self.parts.len() - index - 1
            )));
        }
        Ok(index)
    }

    /// Decode the wire message into its identities, message, and signature.
    /// The signature is returned as-is and is not checked.
    pub fn decode(&self) -> Result<DecodedMessage, KBError> {
        let index = self.delimiter_index()?;
        let identities = self.parts[..index].to_vec();
        let signature = String::from_utf8_lossy(&self.parts[index + 1]).to_string();

        let header: JupyterMessageHeader =
            decode_section(WireSection::Header, &self.parts[index + 2])?;
        let parent_header: Map<String, Value> =
            decode_section(WireSection::ParentHeader, &self.parts[index + 3])?;
        let metadata: Map<String, Value> =
            decode_section(WireSection::Metadata, &self.parts[index + 4])?;
        let content: Map<String, Value> =
            decode_section(WireSection::Content, &self.parts[index + 5])?;

        Ok(DecodedMessage {
            identities,
            message: JupyterMessage {
                header,
                parent_header,
                metadata,
                content,
            },
            signature,
        })
    }

    /// Check the embedded signature against the one computed from the raw JSON
    /// frames. Messages with an empty key are never rejected.
    pub fn verify(&self, key: &str) -> Result<(), KBError> {
        if key.is_empty() {
            return Ok(());
        }
        let index = self.delimiter_index()?;
        let expected = sign(
            key,
            &[
                &self.parts[index + 2],
                &self.parts[index + 3],
                &self.parts[index + 4],
                &self.parts[index + 5],
            ],
        );
        if expected.as_bytes() == self.parts[index + 1].as_slice() {
            return Ok(());
        }

        let msg_id = serde_json::from_slice::<JupyterMessageHeader>(&self.parts[index + 2])
            .map(|header| header.msg_id)
            .unwrap_or_default();
        Err(KBError::SignatureMismatch { msg_id })
    }

    /// Decode the message, checking its signature first when the policy says
    /// so.
    pub fn decode_with_policy(
        &self,
        key: &str,
        policy: SignaturePolicy,
    ) -> Result<DecodedMessage, KBError> {
        if policy == SignaturePolicy::Verify {
            self.verify(key)?;
        }
        self.decode()
    }
}

impl From<Vec<Vec<u8>>> for WireMessage {
    fn from(parts: Vec<Vec<u8>>) -> Self {
        WireMessage { parts }
    }
}

impl From<ZmqMessage> for WireMessage {
    fn from(msg: ZmqMessage) -> Self {
        WireMessage {
            parts: msg.into_vec().into_iter().map(|part| part.to_vec()).collect(),
        }
    }
}

impl TryFrom<WireMessage> for ZmqMessage {
    type Error = KBError;

    fn try_from(msg: WireMessage) -> Result<Self, Self::Error> {
        let frames: Vec<Bytes> = msg.parts.into_iter().map(Bytes::from).collect();
        ZmqMessage::try_from(frames).map_err(|e| KBError::Protocol(e.to_string()))
    }
}
