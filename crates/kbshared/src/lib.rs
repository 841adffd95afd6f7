//! Shared types and utilities for the kbridge kernel bridge and its clients.

/// Jupyter message types
pub mod jupyter_message;

/// Events reported to the client about the kernel
pub mod kernel_message;

/// TCP port helpers
pub mod port_picker;
