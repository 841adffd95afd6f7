//
// jupyter_messages.rs
//
// Copyright (C) 2024-2025 Posit Software, PBC. All rights reserved.
// Licensed under the MIT License. See LICENSE.txt for license information.
//
//

use std::collections::BTreeMap;

use kbshared::{
    jupyter_message::JupyterMessage,
    kernel_message::{ExecutionState, ReplyStatus},
};
use serde::Deserialize;
use serde_json::{Map, Value};

/// An enum of message types we know how to handle from Jupyter. This is in no
/// way exhaustive; it just includes the types the listeners react to.
/// Everything else, including known types whose content doesn't match the
/// expected shape, becomes `Other`.
#[derive(Debug, Clone, PartialEq)]
pub enum JupyterMsg {
    ExecuteReply(ExecuteReply),
    CompleteReply(CompleteReply),
    InspectReply(InspectReply),
    ShutdownReply(ShutdownReply),
    InterruptReply(InterruptReply),
    Stream(Stream),
    ExecuteResult(MimeBundle),
    DisplayData(MimeBundle),
    ExecuteInput(ExecuteInput),
    Status(Status),
    Error(ErrorContent),
    InputRequest(InputRequest),
    Other(String),
}

fn parse<T: for<'de> Deserialize<'de>>(content: &Map<String, Value>) -> Option<T> {
    match serde_json::from_value::<T>(Value::Object(content.clone())) {
        Ok(value) => Some(value),
        Err(err) => {
            log::warn!("Unexpected message content: {}", err);
            None
        }
    }
}

/// Convert a JupyterMessage (generic type) into a JupyterMsg (specific type)
impl From<&JupyterMessage> for JupyterMsg {
    fn from(msg: &JupyterMessage) -> Self {
        let content = &msg.content;
        let typed = match msg.header.msg_type.as_str() {
            "execute_reply" => parse(content).map(JupyterMsg::ExecuteReply),
            "complete_reply" => parse(content).map(JupyterMsg::CompleteReply),
            "inspect_reply" => parse(content).map(JupyterMsg::InspectReply),
            "shutdown_reply" => parse(content).map(JupyterMsg::ShutdownReply),
            "interrupt_reply" => parse(content).map(JupyterMsg::InterruptReply),
            "stream" => parse(content).map(JupyterMsg::Stream),
            "execute_result" => parse(content).map(JupyterMsg::ExecuteResult),
            "display_data" => parse(content).map(JupyterMsg::DisplayData),
            "execute_input" => parse(content).map(JupyterMsg::ExecuteInput),
            "status" => parse(content).map(JupyterMsg::Status),
            "error" => parse(content).map(JupyterMsg::Error),
            "input_request" => parse(content).map(JupyterMsg::InputRequest),
            _ => None,
        };
        typed.unwrap_or_else(|| JupyterMsg::Other(msg.header.msg_type.clone()))
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct ExecuteReply {
    pub status: ReplyStatus,
    #[serde(default)]
    pub execution_count: Option<i64>,
    #[serde(default)]
    pub ename: String,
    #[serde(default)]
    pub evalue: String,
    #[serde(default)]
    pub traceback: Vec<String>,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct CompleteReply {
    pub status: ReplyStatus,
    #[serde(default)]
    pub matches: Vec<String>,
    #[serde(default)]
    pub cursor_start: i64,
    #[serde(default)]
    pub cursor_end: i64,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct InspectReply {
    pub status: ReplyStatus,
    #[serde(default)]
    pub found: bool,
    #[serde(default)]
    pub data: Map<String, Value>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct ShutdownReply {
    pub status: ReplyStatus,
    #[serde(default)]
    pub restart: bool,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct InterruptReply {
    pub status: ReplyStatus,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct Stream {
    pub name: String,
    pub text: String,
}

/// The payload of `execute_result` and `display_data`.
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct MimeBundle {
    pub data: Map<String, Value>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl MimeBundle {
    /// The string-valued MIME entries of the bundle. Entries that aren't
    /// strings (e.g. JSON outputs) are dropped.
    pub fn text_data(&self) -> BTreeMap<String, String> {
        self.data
            .iter()
            .filter_map(|(mime, value)| value.as_str().map(|s| (mime.clone(), s.to_string())))
            .collect()
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct ExecuteInput {
    pub code: String,
    pub execution_count: i64,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct Status {
    pub execution_state: ExecutionState,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct ErrorContent {
    #[serde(default)]
    pub ename: String,
    #[serde(default)]
    pub evalue: String,
    #[serde(default)]
    pub traceback: Vec<String>,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct InputRequest {
    #[serde(default = "default_prompt")]
    pub prompt: String,
    #[serde(default)]
    pub password: bool,
}

fn default_prompt() -> String {
    String::from("Input: ")
}
