//
// connection_file.rs
//
// Copyright (C) 2024-2025 Posit Software, PBC. All rights reserved.
// Licensed under the MIT License. See LICENSE.txt for license information.
//
//

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use kbshared::jupyter_message::JupyterChannel;
use serde::{Deserialize, Serialize};

use crate::error::KBError;

/// The languages we know how to run, with the first of the five consecutive
/// ports reserved for each.
const LANGUAGE_BASE_PORTS: [(&str, u16); 4] = [
    ("python", 55321),
    ("go", 55326),
    ("javascript", 55331),
    ("java", 55336),
];

/// The shared secret used to sign messages for newly created connection files.
pub const DEFAULT_KEY: &str = "abc123";

/// Returns the base port for a language, or None if the language isn't
/// supported.
pub fn base_port(language: &str) -> Option<u16> {
    LANGUAGE_BASE_PORTS
        .iter()
        .find(|(name, _)| *name == language)
        .map(|(_, port)| *port)
}

/// Whether we know how to run kernels for the given language.
pub fn is_supported_language(language: &str) -> bool {
    base_port(language).is_some()
}

/// The contents of the Connection File as listed in the Jupyter specfication,
/// plus the language the kernel runs; directly parsed from JSON.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ConnectionFile {
    /// The language of the kernel these ports belong to
    #[serde(default)]
    pub language: String,

    /// The display name of the kernel
    #[serde(default)]
    pub display_name: String,

    /// The signature scheme; always `hmac-sha256`
    pub signature_scheme: String,

    /// The transport; always `tcp`
    pub transport: String,

    pub stdin_port: u16,
    pub control_port: u16,
    pub iopub_port: u16,
    pub hb_port: u16,
    pub shell_port: u16,

    /// The key used to sign messages
    pub key: String,

    /// The IP address the kernel binds to
    pub ip: String,
}

impl ConnectionFile {
    /// Build the default connection file for a language, with its five ports
    /// laid out consecutively from `base_port`.
    pub fn with_defaults(language: &str, base_port: u16) -> Self {
        Self {
            language: language.to_string(),
            display_name: language.to_string(),
            signature_scheme: String::from("hmac-sha256"),
            transport: String::from("tcp"),
            shell_port: base_port,
            iopub_port: base_port + 1,
            stdin_port: base_port + 2,
            control_port: base_port + 3,
            hb_port: base_port + 4,
            key: String::from(DEFAULT_KEY),
            ip: String::from("127.0.0.1"),
        }
    }

    /// The path of a language's connection file within a project.
    pub fn path_for(project_path: &Path, language: &str) -> PathBuf {
        project_path
            .join("code")
            .join(format!("{}-connection.json", language))
    }

    /// Create a ConnectionFile by parsing the contents of a connection file.
    pub fn from_file<P: AsRef<Path>>(connection_file: P) -> Result<Self, KBError> {
        let path = connection_file.as_ref();
        let file = File::open(path).map_err(|source| KBError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let reader = BufReader::new(file);
        serde_json::from_reader(reader).map_err(|e| {
            KBError::Config(format!(
                "invalid connection file {}: {}",
                path.display(),
                e
            ))
        })
    }

    pub fn to_file<P: AsRef<Path>>(&self, connection_file: P) -> Result<(), KBError> {
        let path = connection_file.as_ref();
        let io_err = |source| KBError::Io {
            path: path.display().to_string(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        let file = File::create(path).map_err(io_err)?;
        serde_json::to_writer_pretty(file, self)
            .map_err(|e| KBError::Config(format!("failed to write {}: {}", path.display(), e)))?;
        Ok(())
    }

    /// Read the connection file for a language, creating it with default
    /// ports if it doesn't exist yet. An existing file is used as-is, so the
    /// ports stay stable across restarts of the same project.
    pub fn read_or_create(project_path: &Path, language: &str) -> Result<Self, KBError> {
        let base_port =
            base_port(language).ok_or_else(|| KBError::UnsupportedLanguage(language.to_string()))?;
        let path = Self::path_for(project_path, language);
        if path.exists() {
            log::debug!("Reading connection file {}", path.display());
            return Self::from_file(&path);
        }

        let connection_file = Self::with_defaults(language, base_port);
        log::debug!(
            "Creating connection file {} (ports {}-{})",
            path.display(),
            base_port,
            base_port + 4
        );
        connection_file.to_file(&path)?;
        Ok(connection_file)
    }

    /// The port for the given channel.
    pub fn port(&self, channel: JupyterChannel) -> u16 {
        match channel {
            JupyterChannel::Shell => self.shell_port,
            JupyterChannel::IOPub => self.iopub_port,
            JupyterChannel::Control => self.control_port,
            JupyterChannel::Stdin => self.stdin_port,
            JupyterChannel::Heartbeat => self.hb_port,
        }
    }

    /// Given a port, return a URI-like string that can be used to connect to
    /// the port, given the other parameters in the connection file.
    ///
    /// Example: `32` => `"tcp://127.0.0.1:32"`
    pub fn endpoint(&self, port: u16) -> String {
        format!("{}://{}:{}", self.transport, self.ip, port)
    }

    /// The endpoint for the given channel.
    pub fn channel_endpoint(&self, channel: JupyterChannel) -> String {
        self.endpoint(self.port(channel))
    }
}
