//
// kernel_message.rs
//
// Copyright (C) 2025 Posit Software, PBC. All rights reserved.
// Licensed under the MIT License. See LICENSE.txt for license information.
//
//

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The execution state a kernel reports on IOPub.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionState {
    /// The kernel is starting up
    Starting,
    /// The kernel is executing a request
    Busy,
    /// The kernel is waiting for work
    Idle,
}

/// The status field common to every Jupyter reply.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ReplyStatus {
    Ok,
    Error,
    Aborted,
}

/// The outcome of a single heartbeat round trip.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HeartbeatStatus {
    Success,
    Failure,
}

/// The outcome of a shutdown, as reported to the client.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ShutdownStatus {
    Success,
    Error,
}

/// Events sent from the bridge to the client about the kernel and the code it
/// runs. Events are fire-and-forget; anything that concerns a single request
/// carries the `message_id` of that request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum KernelEvent {
    /// The kernel process could not be started, or exited abnormally
    LaunchError { language: String, data: String },

    /// The kernel process was started and its sockets are connected
    LaunchSuccess { language: String },

    /// The result of a heartbeat round trip changed
    Heartbeat {
        language: String,
        status: HeartbeatStatus,
    },

    /// The kernel's execution state changed
    KernelStatus {
        language: String,
        status: ExecutionState,
    },

    /// The execution state of a single code block changed. `duration` is
    /// filled in once the block becomes idle.
    CodeBlockStatus {
        message_id: String,
        status: ExecutionState,
        duration: String,
    },

    /// Output written to stdout or stderr, rendered as HTML
    Stream {
        message_id: String,
        name: String,
        text: String,
    },

    /// The result of an execution, keyed by MIME type
    ExecuteResult {
        message_id: String,
        data: BTreeMap<String, String>,
    },

    /// Rich display output, keyed by MIME type
    DisplayData {
        message_id: String,
        data: BTreeMap<String, String>,
    },

    /// The kernel echoed the code it is about to execute
    ExecuteInput {
        message_id: String,
        code: String,
        execution_count: i64,
    },

    /// An error raised while executing code, as published on IOPub
    ExecutionError {
        message_id: String,
        name: String,
        value: String,
        traceback: Vec<String>,
    },

    /// The reply to an execute request
    ExecuteReply {
        message_id: String,
        status: ReplyStatus,
        error_name: String,
        error_value: String,
        error_traceback: Vec<String>,
    },

    /// The reply to a completion request
    CompleteReply {
        message_id: String,
        status: ReplyStatus,
        matches: Vec<String>,
        cursor_start: i64,
        cursor_end: i64,
        metadata: Map<String, Value>,
    },

    /// The reply to an inspection request
    InspectReply {
        message_id: String,
        status: ReplyStatus,
        found: bool,
        data: Map<String, Value>,
        metadata: Map<String, Value>,
    },

    /// The kernel wants input from the user
    InputRequest {
        message_id: String,
        prompt: String,
        password: bool,
    },

    /// The kernel finished (or failed) shutting down
    ShutdownReply {
        language: String,
        status: ShutdownStatus,
    },

    /// The kernel acknowledged an interrupt
    InterruptReply {
        language: String,
        status: ReplyStatus,
    },
}
