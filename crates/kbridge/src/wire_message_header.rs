//
// wire_message_header.rs
//
// Copyright (C) 2024-2025 Posit Software, PBC. All rights reserved.
// Licensed under the MIT License. See LICENSE.txt for license information.
//
//

use kbshared::jupyter_message::JupyterMessageHeader;

/// The version of the Jupyter messaging protocol we speak.
pub const PROTOCOL_VERSION: &str = "5.3";

/// Create a new message header stamped with the current time.
///
/// # Arguments
///
/// - `msg_id`: The message ID; must be unique per request, since replies are
///   matched to requests by it
/// - `msg_type`: The type of the message, e.g. `execute_request`
/// - `session`: The ID of the client session
/// - `username`: The user on whose behalf the message is sent
pub fn new_header(
    msg_id: String,
    msg_type: &str,
    session: &str,
    username: &str,
) -> JupyterMessageHeader {
    // Create an ISO 8601 date string
    let date = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
    JupyterMessageHeader {
        msg_id,
        username: username.to_string(),
        session: session.to_string(),
        msg_type: msg_type.to_string(),
        version: String::from(PROTOCOL_VERSION),
        date,
    }
}
