//
// utils.rs
//
// Copyright (C) 2024-2025 Posit Software, PBC. All rights reserved.
// Licensed under the MIT License. See LICENSE.txt for license information.
//
//

//! Utility functions for kernel session management.

use std::iter;
use std::path::Path;

use chrono::{DateTime, Utc};
use rand::Rng;

use crate::kernel_spec::{CONNECTION_FILE_PLACEHOLDER, RESOURCE_DIR_PLACEHOLDER};

/// Separates the random part of an execute request's ID from its send time.
const EXECUTION_ID_SEPARATOR: char = '|';

/// Generate a unique message ID for Jupyter messages.
///
/// # Returns
///
/// A random hexadecimal string of 10 characters.
pub fn make_message_id() -> String {
    let mut rng = rand::thread_rng();
    iter::repeat_with(|| format!("{:x}", rng.gen_range(0..16)))
        .take(10)
        .collect()
}

/// Append the send time to an execute request's message ID, e.g.
/// `3fa9c01b2e|2025-01-01T12:00:00.000Z`.
pub fn stamp_execution_id(msg_id: &str, sent_at: DateTime<Utc>) -> String {
    format!(
        "{}{}{}",
        msg_id,
        EXECUTION_ID_SEPARATOR,
        sent_at.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
    )
}

/// The send time embedded in a stamped execute request ID, if there is one.
pub fn execution_started_at(msg_id: &str) -> Option<DateTime<Utc>> {
    let (_, stamp) = msg_id.rsplit_once(EXECUTION_ID_SEPARATOR)?;
    DateTime::parse_from_rfc3339(stamp)
        .ok()
        .map(|date| date.with_timezone(&Utc))
}

/// Format how long a block of code ran for.
///
/// - under a second: `"250ms"`
/// - under ten seconds: `"2.50s"`
/// - under a minute: `"12.5s"`
/// - under an hour: `"3m 20s"` (or `"3m"`)
/// - otherwise: `"1h 5m"` (or `"1h"`)
///
/// Negative durations (clock skew) are reported as `"0ms"`.
pub fn format_execution_duration(duration: chrono::Duration) -> String {
    let milliseconds = duration.num_milliseconds().max(0);
    if milliseconds < 1000 {
        return format!("{}ms", milliseconds);
    }

    let seconds = milliseconds as f64 / 1000.0;
    if seconds < 10.0 {
        return format!("{:.2}s", seconds);
    }
    if seconds < 60.0 {
        return format!("{:.1}s", seconds);
    }

    let whole_seconds = milliseconds / 1000;
    let minutes = whole_seconds / 60;
    let remaining_seconds = whole_seconds % 60;
    if minutes < 60 {
        if remaining_seconds == 0 {
            return format!("{}m", minutes);
        }
        return format!("{}m {}s", minutes, remaining_seconds);
    }

    let hours = minutes / 60;
    let remaining_minutes = minutes % 60;
    if remaining_minutes == 0 {
        return format!("{}h", hours);
    }
    format!("{}h {}m", hours, remaining_minutes)
}

/// The formatted time since a stamped execute request was sent, or an empty
/// string if the ID carries no send time.
pub fn execution_duration(msg_id: &str, now: DateTime<Utc>) -> String {
    match execution_started_at(msg_id) {
        Some(started) => format_execution_duration(now - started),
        None => String::new(),
    }
}

/// Substitute the connection file path (and the resource directory, when
/// there is one) into the kernel's argv.
pub fn substitute_placeholders(
    argv: &[String],
    connection_file_path: &Path,
    resource_dir: Option<&Path>,
) -> Vec<String> {
    let connection_file = connection_file_path.to_string_lossy();
    argv.iter()
        .map(|arg| {
            let arg = arg.replace(CONNECTION_FILE_PLACEHOLDER, &connection_file);
            match resource_dir {
                Some(dir) => arg.replace(RESOURCE_DIR_PLACEHOLDER, &dir.to_string_lossy()),
                None => arg,
            }
        })
        .collect()
}
