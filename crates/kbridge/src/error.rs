//
// error.rs
//
// Copyright (C) 2024-2025 Posit Software, PBC. All rights reserved.
// Licensed under the MIT License. See LICENSE.txt for license information.
//
//

use kbshared::jupyter_message::JupyterChannel;
use log::error;
use thiserror::Error;

/// The sections of a wire message that are encoded as JSON.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireSection {
    Header,
    ParentHeader,
    Metadata,
    Content,
}

impl std::fmt::Display for WireSection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            WireSection::Header => "header",
            WireSection::ParentHeader => "parent_header",
            WireSection::Metadata => "metadata",
            WireSection::Content => "content",
        })
    }
}

#[derive(Debug, Error)]
pub enum KBError {
    #[error("Executable not found for {language}: {path}")]
    ExecutableNotFound { language: String, path: String },

    #[error("Failed to create {role} socket: {reason}")]
    SocketCreation {
        role: JupyterChannel,
        reason: String,
    },

    #[error("Failed to connect {role} socket to {endpoint}: {reason}")]
    SocketConnect {
        role: JupyterChannel,
        endpoint: String,
        reason: String,
    },

    #[error("Malformed wire message: {0}")]
    Protocol(String),

    #[error("Failed to decode {section}: {source}")]
    Decoding {
        section: WireSection,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to encode {section}: {source}")]
    Encoding {
        section: WireSection,
        #[source]
        source: serde_json::Error,
    },

    #[error("Signature mismatch on message {msg_id}")]
    SignatureMismatch { msg_id: String },

    #[error("Port {port} is already in use")]
    PortInUse { port: u16 },

    #[error("Unsupported language: {0}")]
    UnsupportedLanguage(String),

    #[error("No running kernel for {0}")]
    SessionNotRunning(String),

    #[error("The previous {language} session is still shutting down after {waited:?}")]
    SessionStillStopping {
        language: String,
        waited: std::time::Duration,
    },

    #[error("Failed to send on {role} socket: {reason}")]
    Send {
        role: JupyterChannel,
        reason: String,
    },

    #[error("Failed to receive on {role} socket: {reason}")]
    Receive {
        role: JupyterChannel,
        reason: String,
    },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl KBError {
    /// A stable numeric code for the error, for logs and for clients that
    /// want to branch on the kind of failure.
    pub fn code(&self) -> u8 {
        match self {
            KBError::ExecutableNotFound { .. } => 1,
            KBError::SocketCreation { .. } => 2,
            KBError::SocketConnect { .. } => 3,
            KBError::Protocol(_) => 4,
            KBError::Decoding { .. } => 5,
            KBError::Encoding { .. } => 6,
            KBError::SignatureMismatch { .. } => 7,
            KBError::PortInUse { .. } => 8,
            KBError::UnsupportedLanguage(_) => 9,
            KBError::SessionNotRunning(_) => 10,
            KBError::Send { .. } => 11,
            KBError::Receive { .. } => 12,
            KBError::Io { .. } => 13,
            KBError::Config(_) => 14,
            KBError::SessionStillStopping { .. } => 15,
        }
    }

    /// Whether the error concerns a single malformed message rather than the
    /// transport; listeners skip such messages and keep going.
    pub fn is_message_error(&self) -> bool {
        matches!(
            self,
            KBError::Protocol(_) | KBError::Decoding { .. } | KBError::SignatureMismatch { .. }
        )
    }

    pub fn log(&self) {
        error!("Error KB-{}: {}", self.code(), self);
    }
}
