//
// socket.rs
//
// Copyright (C) 2024-2025 Posit Software, PBC. All rights reserved.
// Licensed under the MIT License. See LICENSE.txt for license information.
//
//

use std::str::FromStr;
use std::time::Duration;

use async_channel::{Receiver, Sender};
use async_trait::async_trait;
use kbshared::jupyter_message::JupyterChannel;
use zeromq::{
    util::PeerIdentity, DealerSocket, ReqSocket, Socket, SocketOptions, SocketRecv, SocketSend,
    SubSocket, ZmqMessage,
};

use crate::{error::KBError, wire_message::WireMessage};

/// A socket that sends and receives multipart frames. Each listener owns
/// exactly one.
#[async_trait]
pub trait FrameSocket: Send {
    /// The channel this socket serves.
    fn role(&self) -> JupyterChannel;

    async fn send(&mut self, msg: WireMessage) -> Result<(), KBError>;

    /// Receive the next multipart message. Must be safe to drop mid-flight,
    /// since listeners race it against cancellation.
    async fn recv(&mut self) -> Result<WireMessage, KBError>;

    /// Close the socket. Sends and receives fail afterwards.
    async fn close(&mut self);
}

/// Opens and connects the socket for a channel.
#[async_trait]
pub trait SocketFactory: Send + Sync {
    /// # Arguments
    ///
    /// - `role`: The channel to open a socket for; decides the socket type
    /// - `endpoint`: The address to connect to, e.g. `tcp://127.0.0.1:55321`
    /// - `session_id`: The peer identity for dealer sockets
    async fn open(
        &self,
        role: JupyterChannel,
        endpoint: &str,
        session_id: &str,
    ) -> Result<Box<dyn FrameSocket>, KBError>;
}

enum ZmqInner {
    Dealer(DealerSocket),
    Sub(SubSocket),
    Req(ReqSocket),
}

/// A ZeroMQ socket of the type Jupyter prescribes for its channel: DEALER
/// for shell, control, and stdin; SUB for iopub; REQ for the heartbeat.
pub struct ZmqChannelSocket {
    role: JupyterChannel,
    inner: Option<ZmqInner>,
}

/// Creates the socket options for DEALER sockets to set the peer identity
/// to the session ID.
fn dealer_peer_opts(role: JupyterChannel, session_id: &str) -> Result<SocketOptions, KBError> {
    let mut peer_opts = SocketOptions::default();
    let peer_id = PeerIdentity::from_str(session_id).map_err(|e| KBError::SocketCreation {
        role,
        reason: format!("invalid peer identity '{}': {}", session_id, e),
    })?;
    peer_opts.peer_identity(peer_id);
    Ok(peer_opts)
}

impl ZmqChannelSocket {
    /// Create the socket for a channel without connecting it.
    pub fn new(role: JupyterChannel, session_id: &str) -> Result<Self, KBError> {
        let inner = match role {
            JupyterChannel::Shell | JupyterChannel::Control | JupyterChannel::Stdin => {
                ZmqInner::Dealer(DealerSocket::with_options(dealer_peer_opts(
                    role, session_id,
                )?))
            }
            JupyterChannel::IOPub => ZmqInner::Sub(SubSocket::new()),
            JupyterChannel::Heartbeat => ZmqInner::Req(ReqSocket::new()),
        };
        Ok(Self {
            role,
            inner: Some(inner),
        })
    }

    /// Connect to the kernel. IOPub sockets are also subscribed to every
    /// topic.
    pub async fn connect(&mut self, endpoint: &str) -> Result<(), KBError> {
        let role = self.role;
        let connect_err = |e: zeromq::ZmqError| KBError::SocketConnect {
            role,
            endpoint: endpoint.to_string(),
            reason: e.to_string(),
        };
        match self.inner.as_mut() {
            Some(ZmqInner::Dealer(socket)) => socket.connect(endpoint).await.map_err(connect_err),
            Some(ZmqInner::Req(socket)) => socket.connect(endpoint).await.map_err(connect_err),
            Some(ZmqInner::Sub(socket)) => {
                socket.connect(endpoint).await.map_err(connect_err)?;
                socket.subscribe("").await.map_err(connect_err)
            }
            None => Err(KBError::SocketConnect {
                role,
                endpoint: endpoint.to_string(),
                reason: String::from("socket is closed"),
            }),
        }
    }
}

#[async_trait]
impl FrameSocket for ZmqChannelSocket {
    fn role(&self) -> JupyterChannel {
        self.role
    }

    async fn send(&mut self, msg: WireMessage) -> Result<(), KBError> {
        let role = self.role;
        let send_err = |reason: String| KBError::Send { role, reason };
        let zmq_message = ZmqMessage::try_from(msg)?;
        match self.inner.as_mut() {
            Some(ZmqInner::Dealer(socket)) => socket
                .send(zmq_message)
                .await
                .map_err(|e| send_err(e.to_string())),
            Some(ZmqInner::Req(socket)) => socket
                .send(zmq_message)
                .await
                .map_err(|e| send_err(e.to_string())),
            Some(ZmqInner::Sub(_)) => Err(send_err(String::from(
                "subscriber sockets cannot send",
            ))),
            None => Err(send_err(String::from("socket is closed"))),
        }
    }

    async fn recv(&mut self) -> Result<WireMessage, KBError> {
        let role = self.role;
        let received = match self.inner.as_mut() {
            Some(ZmqInner::Dealer(socket)) => socket.recv().await,
            Some(ZmqInner::Sub(socket)) => socket.recv().await,
            Some(ZmqInner::Req(socket)) => socket.recv().await,
            None => {
                return Err(KBError::Receive {
                    role,
                    reason: String::from("socket is closed"),
                })
            }
        };
        received
            .map(WireMessage::from)
            .map_err(|e| KBError::Receive {
                role,
                reason: e.to_string(),
            })
    }

    async fn close(&mut self) {
        // Closing consumes the socket, so take it.
        match self.inner.take() {
            Some(ZmqInner::Dealer(socket)) => {
                socket.close().await;
            }
            Some(ZmqInner::Sub(socket)) => {
                socket.close().await;
            }
            Some(ZmqInner::Req(socket)) => {
                socket.close().await;
            }
            None => {}
        }
    }
}

/// Opens real ZeroMQ sockets.
#[derive(Debug, Clone)]
pub struct ZmqSocketFactory {
    /// How long to wait for the kernel to accept a connection
    connect_timeout: Duration,
}

impl ZmqSocketFactory {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for ZmqSocketFactory {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

#[async_trait]
impl SocketFactory for ZmqSocketFactory {
    async fn open(
        &self,
        role: JupyterChannel,
        endpoint: &str,
        session_id: &str,
    ) -> Result<Box<dyn FrameSocket>, KBError> {
        let mut socket = ZmqChannelSocket::new(role, session_id)?;
        // Connecting retries until the kernel is listening, so bound it.
        tokio::time::timeout(self.connect_timeout, socket.connect(endpoint))
            .await
            .map_err(|_| KBError::SocketConnect {
                role,
                endpoint: endpoint.to_string(),
                reason: format!("timed out after {:?}", self.connect_timeout),
            })??;
        log::trace!("Connected {} socket to {}", role, endpoint);
        Ok(Box::new(socket))
    }
}

/// One end of an in-memory socket pair. Whatever one end sends, the other
/// receives, in order. Used in place of a live kernel.
pub struct MemorySocket {
    role: JupyterChannel,
    tx: Sender<WireMessage>,
    rx: Receiver<WireMessage>,
}

impl MemorySocket {
    /// Create a connected pair of sockets for a channel.
    pub fn pair(role: JupyterChannel) -> (MemorySocket, MemorySocket) {
        let (a_tx, a_rx) = async_channel::unbounded();
        let (b_tx, b_rx) = async_channel::unbounded();
        (
            MemorySocket {
                role,
                tx: a_tx,
                rx: b_rx,
            },
            MemorySocket {
                role,
                tx: b_tx,
                rx: a_rx,
            },
        )
    }

    /// Whether the other end has been closed or dropped.
    pub fn is_peer_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[async_trait]
impl FrameSocket for MemorySocket {
    fn role(&self) -> JupyterChannel {
        self.role
    }

    async fn send(&mut self, msg: WireMessage) -> Result<(), KBError> {
        self.tx.send(msg).await.map_err(|e| KBError::Send {
            role: self.role,
            reason: e.to_string(),
        })
    }

    async fn recv(&mut self) -> Result<WireMessage, KBError> {
        self.rx.recv().await.map_err(|e| KBError::Receive {
            role: self.role,
            reason: e.to_string(),
        })
    }

    async fn close(&mut self) {
        self.tx.close();
        self.rx.close();
    }
}
