//! Launches Jupyter kernels and drives them over the five-socket ZeroMQ
//! protocol: signed wire messages, one listener per socket, a heartbeat, and
//! coordinated shutdown.

#![allow(missing_docs)]

pub mod channels;
pub mod config;
pub mod connection_file;
pub mod error;
pub mod heartbeat;
pub mod jupyter_messages;
pub mod kernel_connection;
pub mod kernel_session;
pub mod kernel_spec;
pub mod listener;
pub mod requests;
pub mod session_manager;
pub mod shutdown;
pub mod socket;
pub mod socket_set;
pub mod wire_message;
pub mod wire_message_header;
