//
// session_manager_test.rs
//
// Copyright (C) 2025 Posit Software, PBC. All rights reserved.
// Licensed under the MIT License. See LICENSE.txt for license information.
//
//

//! Tests for starting, using, and resetting kernel sessions

#[path = "common/mod.rs"]
mod common;

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_channel::{Receiver, Sender};
use async_trait::async_trait;
use common::{
    collect_events, free_port, kernel_wire, next_event, recv_request, MemorySocketFactory,
};
use kbridge::{
    config::{HeartbeatConfig, SessionConfig},
    connection_file::ConnectionFile,
    error::KBError,
    kernel_spec::KernelSpec,
    session_manager::KernelSessionManager,
    shutdown::SessionPhase,
    socket::{FrameSocket, MemorySocket, SocketFactory},
    wire_message::WireMessage,
};
use kbshared::{jupyter_message::JupyterChannel, kernel_message::KernelEvent};
use serde_json::json;

fn test_config(project: &Path) -> SessionConfig {
    let mut config = SessionConfig::new(project.to_path_buf());
    config.username = String::from("tester");
    config.heartbeat = HeartbeatConfig {
        interval: Duration::from_millis(50),
        timeout: Duration::from_millis(200),
        max_consecutive_failures: 5,
    };
    config.shutdown_grace = Duration::from_secs(2);
    config
}

/// Write a kernel spec (and a connection file on free ports) so the session
/// starts `argv` instead of a real kernel.
fn write_kernel(project: &Path, language: &str, argv: &[&str]) {
    let mut spec = KernelSpec::default_for(language).expect("known language");
    spec.argv = argv.iter().map(|arg| arg.to_string()).collect();
    spec.shutdown_on_shell = false;
    let path = KernelSpec::path_for(project, language);
    std::fs::create_dir_all(path.parent().expect("parent")).expect("create code dir");
    std::fs::write(&path, serde_json::to_vec_pretty(&spec).expect("serialize")).expect("write");

    ConnectionFile::with_defaults(language, free_port())
        .to_file(ConnectionFile::path_for(project, language))
        .expect("write connection file");
}

#[tokio::test]
async fn test_unsupported_language() {
    let project = tempfile::tempdir().expect("tempdir");
    let (event_tx, _event_rx) = async_channel::unbounded();
    let (factory, _kernel_rx) = MemorySocketFactory::new();
    let manager =
        KernelSessionManager::with_factory(test_config(project.path()), event_tx, factory);

    let result = manager.start("cobol", None).await;
    assert!(matches!(result, Err(KBError::UnsupportedLanguage(ref l)) if l == "cobol"));
    assert!(!project.path().join("code").exists());
}

#[tokio::test]
async fn test_python_needs_a_virtual_env() {
    let project = tempfile::tempdir().expect("tempdir");
    let (event_tx, _event_rx) = async_channel::unbounded();
    let (factory, _kernel_rx) = MemorySocketFactory::new();
    let manager =
        KernelSessionManager::with_factory(test_config(project.path()), event_tx, factory.clone());

    let result = manager.start("python", None).await;
    assert!(matches!(result, Err(KBError::ExecutableNotFound { .. })));

    // A directory without pyvenv.cfg isn't a virtual environment
    let not_a_venv = tempfile::tempdir().expect("tempdir");
    let result = manager.start("python", Some(not_a_venv.path())).await;
    assert!(matches!(result, Err(KBError::ExecutableNotFound { .. })));
    assert_eq!(factory.opened(), 0);
}

#[tokio::test]
async fn test_requests_need_a_running_kernel() {
    let project = tempfile::tempdir().expect("tempdir");
    let (event_tx, _event_rx) = async_channel::unbounded();
    let (factory, _kernel_rx) = MemorySocketFactory::new();
    let manager =
        KernelSessionManager::with_factory(test_config(project.path()), event_tx, factory);

    assert!(matches!(
        manager.interrupt("go", "int-1").await,
        Err(KBError::SessionNotRunning(_))
    ));
    assert!(matches!(
        manager.complete("go", "comp-1", "fmt.", 4).await,
        Err(KBError::SessionNotRunning(_))
    ));
    assert!(matches!(
        manager.shutdown("go", "sd-1", false).await,
        Err(KBError::SessionNotRunning(_))
    ));
    assert!(!manager.is_kernel_available("go").await);
    assert_eq!(manager.phase("go").await, None);
    assert!(manager.reset("go").await);
}

#[tokio::test]
async fn test_missing_kernel_executable() {
    let project = tempfile::tempdir().expect("tempdir");
    write_kernel(
        project.path(),
        "javascript",
        &["/nonexistent/kernel-binary", "{connection_file}"],
    );
    let (event_tx, event_rx) = async_channel::unbounded();
    let (factory, _kernel_rx) = MemorySocketFactory::new();
    let manager =
        KernelSessionManager::with_factory(test_config(project.path()), event_tx, factory.clone());

    let result = manager.start("javascript", None).await;
    assert!(matches!(result, Err(KBError::ExecutableNotFound { .. })));
    match next_event(&event_rx).await {
        KernelEvent::LaunchError { language, data } => {
            assert_eq!(language, "javascript");
            assert!(data.contains("/nonexistent/kernel-binary"), "data: {}", data);
        }
        other => panic!("Expected a launch error, got {:?}", other),
    }
    assert_eq!(factory.opened(), 0);
}

#[cfg(unix)]
#[tokio::test]
async fn test_kernel_exit_is_reported() {
    let project = tempfile::tempdir().expect("tempdir");
    write_kernel(
        project.path(),
        "java",
        &["sh", "-c", "sleep 0.2; echo 'kernel exploded' >&2; exit 3"],
    );
    let (event_tx, event_rx) = async_channel::unbounded();
    let (factory, _kernel_rx) = MemorySocketFactory::new();
    let manager =
        KernelSessionManager::with_factory(test_config(project.path()), event_tx, factory);

    // The process dies after the sockets are connected; if it dies sooner,
    // connecting fails instead. Either way the exit is reported.
    let _ = manager.start("java", None).await;

    let events = collect_events(&event_rx, Duration::from_secs(2)).await;
    let launch_error = events.iter().find_map(|event| match event {
        KernelEvent::LaunchError { data, .. } => Some(data.clone()),
        _ => None,
    });
    let launch_error = launch_error.expect("launch error after exit");
    assert!(launch_error.contains("kernel exploded"), "data: {}", launch_error);

    assert!(manager.wait_stopped("java", Duration::from_secs(2)).await);
    // The stopped session has been released
    assert_eq!(manager.phase("java").await, None);
}

/// Take the kernel ends of the five sockets opened for a session.
async fn kernel_ends(
    rx: &async_channel::Receiver<MemorySocket>,
) -> std::collections::HashMap<JupyterChannel, MemorySocket> {
    let mut ends = std::collections::HashMap::new();
    while ends.len() < 5 {
        let socket = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for sockets")
            .expect("factory closed");
        ends.insert(socket.role(), socket);
    }
    ends
}

/// Echo pings back, as a kernel's heartbeat socket does.
fn answer_heartbeats(mut heartbeat: MemorySocket) {
    tokio::spawn(async move {
        while let Ok(ping) = heartbeat.recv().await {
            if heartbeat.send(ping).await.is_err() {
                break;
            }
        }
    });
}

async fn wait_available(manager: &KernelSessionManager, language: &str) {
    for _ in 0..40 {
        if manager.is_kernel_available(language).await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("{} kernel never became available", language);
}

#[cfg(unix)]
#[tokio::test]
async fn test_session_lifecycle() {
    let project = tempfile::tempdir().expect("tempdir");
    write_kernel(project.path(), "go", &["sh", "-c", "sleep 3"]);
    let (event_tx, event_rx) = async_channel::unbounded();
    let (factory, kernel_rx) = MemorySocketFactory::new();
    let manager = Arc::new(KernelSessionManager::with_factory(
        test_config(project.path()),
        event_tx,
        factory.clone(),
    ));

    manager.start("go", None).await.expect("start");
    assert_eq!(
        next_event(&event_rx).await,
        KernelEvent::LaunchSuccess {
            language: String::from("go"),
        }
    );
    let mut ends = kernel_ends(&kernel_rx).await;
    assert!(project.path().join("code/go-connection.json").is_file());

    answer_heartbeats(ends.remove(&JupyterChannel::Heartbeat).expect("heartbeat"));
    wait_available(&manager, "go").await;
    assert_eq!(manager.phase("go").await, Some(SessionPhase::Running));

    let msg_id = manager
        .execute("go", "cell-1", "1 + 1")
        .await
        .expect("execute");
    assert!(msg_id.starts_with("cell-1|"), "execute IDs carry a send time: {}", msg_id);
    let shell = ends.get_mut(&JupyterChannel::Shell).expect("shell");
    let request = recv_request(shell).await;
    assert_eq!(request.header.msg_type, "execute_request");
    assert_eq!(request.header.msg_id, msg_id);
    assert_eq!(request.header.username, "tester");

    let msg_id = manager.interrupt("go", "int-2").await.expect("interrupt");
    assert_eq!(msg_id, "int-2");
    let control = ends.get_mut(&JupyterChannel::Control).expect("control");
    let request = recv_request(control).await;
    assert_eq!(request.header.msg_type, "interrupt_request");
    assert_eq!(request.header.msg_id, msg_id);

    // Starting again reuses the session and every socket
    manager.start("go", None).await.expect("start again");
    assert_eq!(factory.opened(), 5);

    // Resetting ends the session; the control listener sends the kernel a
    // last shutdown request on its way out.
    assert!(manager.reset("go").await);
    let control = ends.get_mut(&JupyterChannel::Control).expect("control");
    let request = recv_request(control).await;
    assert_eq!(request.header.msg_type, "shutdown_request");
    assert_eq!(manager.phase("go").await, None);
    assert!(!manager.is_kernel_available("go").await);

    let events = collect_events(&event_rx, Duration::from_millis(200)).await;
    assert!(events.contains(&KernelEvent::ShutdownReply {
        language: String::from("go"),
        status: kbshared::kernel_message::ShutdownStatus::Success,
    }));
    assert!(!events
        .iter()
        .any(|event| matches!(event, KernelEvent::LaunchSuccess { .. })));
}

#[cfg(unix)]
#[tokio::test]
async fn test_restart_starts_a_new_kernel() {
    let project = tempfile::tempdir().expect("tempdir");
    // Stands in for a kernel that exits shortly after being asked to
    write_kernel(project.path(), "javascript", &["sh", "-c", "sleep 1.5"]);
    let (event_tx, event_rx) = async_channel::unbounded();
    let (factory, kernel_rx) = MemorySocketFactory::new();
    let manager =
        KernelSessionManager::with_factory(test_config(project.path()), event_tx, factory.clone());

    manager.start("javascript", None).await.expect("start");
    let mut ends = kernel_ends(&kernel_rx).await;
    answer_heartbeats(ends.remove(&JupyterChannel::Heartbeat).expect("heartbeat"));
    wait_available(&manager, "javascript").await;

    manager.restart("javascript").await.expect("restart");

    let control = ends.get_mut(&JupyterChannel::Control).expect("control");
    let request = recv_request(control).await;
    assert_eq!(request.header.msg_type, "shutdown_request");
    assert_eq!(request.content.get("restart"), Some(&serde_json::json!(true)));

    // A whole new set of sockets for the new kernel
    assert_eq!(factory.opened(), 10);
    assert_eq!(
        manager.phase("javascript").await,
        Some(SessionPhase::Running)
    );

    let events = collect_events(&event_rx, Duration::from_millis(200)).await;
    let launches = events
        .iter()
        .filter(|event| matches!(event, KernelEvent::LaunchSuccess { .. }))
        .count();
    assert_eq!(launches, 2);

    manager.reset("javascript").await;
}

/// Wraps an in-memory socket whose close takes a while, as a ZeroMQ socket
/// flushing to a slow peer does.
struct SlowCloseSocket {
    inner: MemorySocket,
    delay: Duration,
    closing: Arc<AtomicUsize>,
}

#[async_trait]
impl FrameSocket for SlowCloseSocket {
    fn role(&self) -> JupyterChannel {
        self.inner.role()
    }

    async fn send(&mut self, msg: WireMessage) -> Result<(), KBError> {
        self.inner.send(msg).await
    }

    async fn recv(&mut self) -> Result<WireMessage, KBError> {
        self.inner.recv().await
    }

    async fn close(&mut self) {
        self.closing.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.inner.close().await;
        self.closing.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Opens slow-closing sockets, and counts the sockets opened while another
/// one was still closing.
struct SlowCloseFactory {
    delay: Duration,
    closing: Arc<AtomicUsize>,
    opened: AtomicUsize,
    opened_while_closing: AtomicUsize,
    kernel_tx: Sender<MemorySocket>,
}

impl SlowCloseFactory {
    fn new(delay: Duration) -> (Arc<Self>, Receiver<MemorySocket>) {
        let (kernel_tx, kernel_rx) = async_channel::unbounded();
        let factory = Self {
            delay,
            closing: Arc::new(AtomicUsize::new(0)),
            opened: AtomicUsize::new(0),
            opened_while_closing: AtomicUsize::new(0),
            kernel_tx,
        };
        (Arc::new(factory), kernel_rx)
    }
}

#[async_trait]
impl SocketFactory for SlowCloseFactory {
    async fn open(
        &self,
        role: JupyterChannel,
        _endpoint: &str,
        _session_id: &str,
    ) -> Result<Box<dyn FrameSocket>, KBError> {
        if self.closing.load(Ordering::SeqCst) > 0 {
            self.opened_while_closing.fetch_add(1, Ordering::SeqCst);
        }
        self.opened.fetch_add(1, Ordering::SeqCst);
        let (bridge, kernel) = MemorySocket::pair(role);
        self.kernel_tx
            .send(kernel)
            .await
            .map_err(|e| KBError::SocketCreation {
                role,
                reason: e.to_string(),
            })?;
        Ok(Box::new(SlowCloseSocket {
            inner: bridge,
            delay: self.delay,
            closing: self.closing.clone(),
        }))
    }
}

#[cfg(unix)]
#[tokio::test]
async fn test_start_waits_for_previous_session_to_stop() {
    let project = tempfile::tempdir().expect("tempdir");
    write_kernel(project.path(), "go", &["sh", "-c", "sleep 5"]);
    let (event_tx, _event_rx) = async_channel::unbounded();
    let (factory, kernel_rx) = SlowCloseFactory::new(Duration::from_millis(400));
    let manager =
        KernelSessionManager::with_factory(test_config(project.path()), event_tx, factory.clone());

    manager.start("go", None).await.expect("start");
    let mut ends = kernel_ends(&kernel_rx).await;
    answer_heartbeats(ends.remove(&JupyterChannel::Heartbeat).expect("heartbeat"));
    wait_available(&manager, "go").await;

    // The kernel goes idle after a shutdown request, which ends the session;
    // its sockets then take a while to close.
    manager.shutdown("go", "sd-1", false).await.expect("shutdown");
    let iopub = ends.get_mut(&JupyterChannel::IOPub).expect("iopub");
    iopub
        .send(kernel_wire(
            "status",
            Some(("sd-1", "shutdown_request")),
            json!({"execution_state": "idle"}),
        ))
        .await
        .expect("send idle");
    for _ in 0..100 {
        if manager.phase("go").await != Some(SessionPhase::Running) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(manager.phase("go").await, Some(SessionPhase::ShuttingDown));

    // Starting again must not put a second set of sockets on the same ports
    // while the old ones are still open.
    manager.start("go", None).await.expect("start again");
    assert_eq!(factory.opened_while_closing.load(Ordering::SeqCst), 0);
    assert_eq!(factory.opened.load(Ordering::SeqCst), 10);
    assert_eq!(manager.phase("go").await, Some(SessionPhase::Running));

    manager.reset("go").await;
}

#[cfg(unix)]
#[tokio::test]
async fn test_execute_without_heartbeat_reuses_running_session() {
    let project = tempfile::tempdir().expect("tempdir");
    write_kernel(project.path(), "javascript", &["sh", "-c", "sleep 3"]);
    let mut config = test_config(project.path());
    // Keep the first heartbeat outstanding for the whole test
    config.heartbeat.timeout = Duration::from_secs(3);
    let (event_tx, event_rx) = async_channel::unbounded();
    let (factory, kernel_rx) = MemorySocketFactory::new();
    let manager = KernelSessionManager::with_factory(config, event_tx, factory.clone());

    manager.start("javascript", None).await.expect("start");
    let mut ends = kernel_ends(&kernel_rx).await;
    assert!(!manager.heartbeat_status("javascript").await);
    assert_eq!(
        manager.phase("javascript").await,
        Some(SessionPhase::Running)
    );

    let msg_id = manager
        .execute("javascript", "cell-7", "console.log(1)")
        .await
        .expect("execute");
    assert!(msg_id.starts_with("cell-7|"), "id: {}", msg_id);
    assert_eq!(factory.opened(), 5);

    let shell = ends.get_mut(&JupyterChannel::Shell).expect("shell");
    let request = recv_request(shell).await;
    assert_eq!(request.header.msg_type, "execute_request");
    assert_eq!(request.header.msg_id, msg_id);

    let events = collect_events(&event_rx, Duration::from_millis(100)).await;
    let launches = events
        .iter()
        .filter(|event| matches!(event, KernelEvent::LaunchSuccess { .. }))
        .count();
    assert_eq!(launches, 1);

    manager.reset("javascript").await;
}
