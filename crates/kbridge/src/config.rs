//
// config.rs
//
// Copyright (C) 2024-2025 Posit Software, PBC. All rights reserved.
// Licensed under the MIT License. See LICENSE.txt for license information.
//
//

use std::path::PathBuf;
use std::time::Duration;

use crate::wire_message::SignaturePolicy;

/// Timing for the heartbeat monitor.
#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    /// How often to ping the kernel
    pub interval: Duration,

    /// How long to wait for the pong before counting the round trip as failed
    pub timeout: Duration,

    /// How many failed round trips in a row end the session
    pub max_consecutive_failures: u32,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            timeout: Duration::from_secs(2),
            max_consecutive_failures: 5,
        }
    }
}

/// Settings shared by every kernel session the manager runs.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// The project whose `code/` directory holds connection files and kernel
    /// specs
    pub project_path: PathBuf,

    /// The user name stamped on outgoing message headers
    pub username: String,

    /// How long a listener backs off after a receive error
    pub poll_interval: Duration,

    /// How long to wait for a kernel to accept socket connections
    pub connect_timeout: Duration,

    pub heartbeat: HeartbeatConfig,

    /// Whether incoming message signatures are checked
    pub signature_policy: SignaturePolicy,

    /// How long to wait for listeners to close their sockets after a
    /// shutdown
    pub shutdown_grace: Duration,

    /// Substituted for `{resource_dir}` in kernel argv, if set
    pub resource_dir: Option<PathBuf>,
}

impl SessionConfig {
    pub fn new(project_path: PathBuf) -> Self {
        Self {
            project_path,
            ..Default::default()
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        let username = std::env::var("USER")
            .or_else(|_| std::env::var("USERNAME"))
            .unwrap_or_else(|_| String::from("kbridge"));
        Self {
            project_path: PathBuf::from("."),
            username,
            poll_interval: Duration::from_millis(50),
            connect_timeout: Duration::from_secs(30),
            heartbeat: HeartbeatConfig::default(),
            signature_policy: SignaturePolicy::default(),
            shutdown_grace: Duration::from_secs(5),
            resource_dir: None,
        }
    }
}
