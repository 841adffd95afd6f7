//
// mod.rs
//
// Copyright (C) 2025 Posit Software, PBC. All rights reserved.
// Licensed under the MIT License. See LICENSE.txt for license information.
//
//

//! Helpers shared by the integration tests: an in-memory stand-in for the
//! kernel's sockets, and builders for the messages a kernel would send.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_channel::{Receiver, Sender};
use async_trait::async_trait;
use kbridge::{
    connection_file::ConnectionFile,
    error::KBError,
    kernel_connection::KernelConnection,
    kernel_session::make_message_id,
    listener::ListenerContext,
    shutdown::ShutdownCoordinator,
    socket::{FrameSocket, MemorySocket, SocketFactory},
    wire_message::{SignaturePolicy, WireMessage},
    wire_message_header::new_header,
};
use kbshared::{
    jupyter_message::{JupyterChannel, JupyterMessage},
    kernel_message::KernelEvent,
};
use serde_json::{json, Map, Value};

/// The key the test kernels sign with.
pub const TEST_KEY: &str = "abc123";

/// Opens in-memory socket pairs. The bridge gets one end; the other end is
/// handed to the test, which plays the kernel.
pub struct MemorySocketFactory {
    opened: AtomicUsize,
    kernel_tx: Sender<MemorySocket>,
}

impl MemorySocketFactory {
    /// Returns the factory and the receiver on which the kernel ends of the
    /// opened sockets arrive.
    pub fn new() -> (Arc<Self>, Receiver<MemorySocket>) {
        let (kernel_tx, kernel_rx) = async_channel::unbounded();
        (
            Arc::new(Self {
                opened: AtomicUsize::new(0),
                kernel_tx,
            }),
            kernel_rx,
        )
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SocketFactory for MemorySocketFactory {
    async fn open(
        &self,
        role: JupyterChannel,
        _endpoint: &str,
        _session_id: &str,
    ) -> Result<Box<dyn FrameSocket>, KBError> {
        let (bridge, kernel) = MemorySocket::pair(role);
        self.opened.fetch_add(1, Ordering::SeqCst);
        self.kernel_tx
            .send(kernel)
            .await
            .map_err(|e| KBError::SocketCreation {
                role,
                reason: e.to_string(),
            })?;
        Ok(Box::new(bridge))
    }
}

/// A TCP port nothing is listening on, as far as the OS knows.
pub fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .and_then(|listener| listener.local_addr())
        .expect("Failed to find a free port")
        .port()
}

pub fn test_connection_file() -> ConnectionFile {
    ConnectionFile::with_defaults("python", 55321)
}

pub fn test_connection() -> KernelConnection {
    KernelConnection::new(
        &test_connection_file(),
        String::from("tester"),
        SignaturePolicy::Verify,
    )
}

/// A listener context for a python session, and the receiving end of its
/// event channel.
pub fn test_context() -> (ListenerContext, Receiver<KernelEvent>) {
    let (event_tx, event_rx) = async_channel::unbounded();
    let ctx = ListenerContext {
        language: String::from("python"),
        connection: test_connection(),
        shutdown: ShutdownCoordinator::new("python"),
        event_tx,
        poll_interval: Duration::from_millis(10),
    };
    (ctx, event_rx)
}

/// Build a message as the kernel would send it, in reply to (or caused by)
/// the given parent.
pub fn kernel_message(
    msg_type: &str,
    parent: Option<(&str, &str)>,
    content: Value,
) -> JupyterMessage {
    let mut parent_header = Map::new();
    if let Some((msg_id, parent_type)) = parent {
        parent_header.insert(String::from("msg_id"), json!(msg_id));
        parent_header.insert(String::from("msg_type"), json!(parent_type));
    }
    JupyterMessage {
        header: new_header(make_message_id(), msg_type, "kernel-session", "kernel"),
        parent_header,
        metadata: Map::new(),
        content: content.as_object().cloned().unwrap_or_default(),
    }
}

/// Like [`kernel_message`], signed and framed with the test key.
pub fn kernel_wire(msg_type: &str, parent: Option<(&str, &str)>, content: Value) -> WireMessage {
    let msg = kernel_message(msg_type, parent, content);
    WireMessage::encode(&[b"kernel".to_vec()], &msg, TEST_KEY).expect("Failed to encode message")
}

/// Wait for the next event, failing the test if none arrives in time.
pub async fn next_event(rx: &Receiver<KernelEvent>) -> KernelEvent {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("Timed out waiting for an event")
        .expect("Event channel closed")
}

/// Collect every event that arrives within `window`.
pub async fn collect_events(rx: &Receiver<KernelEvent>, window: Duration) -> Vec<KernelEvent> {
    let mut events = Vec::new();
    let deadline = tokio::time::Instant::now() + window;
    while let Ok(Ok(event)) = tokio::time::timeout_at(deadline, rx.recv()).await {
        events.push(event);
    }
    events
}

/// Receive the next message on a kernel-side socket and decode it.
pub async fn recv_request(socket: &mut MemorySocket) -> JupyterMessage {
    let wire = tokio::time::timeout(Duration::from_secs(2), socket.recv())
        .await
        .expect("Timed out waiting for a request")
        .expect("Socket closed");
    wire.decode().expect("Failed to decode request").message
}
