//
// mod.rs
//
// Copyright (C) 2024-2025 Posit Software, PBC. All rights reserved.
// Licensed under the MIT License. See LICENSE.txt for license information.
//
//

//! The handlers that give each message-bearing channel its behavior.

mod control;
mod iopub;
mod shell;
mod stdin;

pub use control::ControlHandler;
pub use iopub::IOPubHandler;
pub use shell::ShellHandler;
pub use stdin::StdinHandler;

/// Render text containing ANSI escape sequences (colored tracebacks, stream
/// output) as HTML. Text that can't be converted is passed through as-is.
pub fn render_ansi(text: &str) -> String {
    match ansi_to_html::convert(text) {
        Ok(html) => html,
        Err(err) => {
            log::debug!("Could not convert ANSI text to HTML: {}", err);
            text.to_string()
        }
    }
}

pub fn render_traceback(traceback: &[String]) -> Vec<String> {
    traceback.iter().map(|line| render_ansi(line)).collect()
}
