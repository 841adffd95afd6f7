//
// shutdown.rs
//
// Copyright (C) 2024-2025 Posit Software, PBC. All rights reserved.
// Licensed under the MIT License. See LICENSE.txt for license information.
//
//

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::{sync::CancellationToken, task::TaskTracker};

/// Where a kernel session is in its teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Listeners are receiving
    Running,

    /// Shutdown was requested; listeners are finishing their exit paths
    ShuttingDown,

    /// Every listener has closed its socket and exited
    Stopped,
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            SessionPhase::Running => "running",
            SessionPhase::ShuttingDown => "shutting down",
            SessionPhase::Stopped => "stopped",
        })
    }
}

struct Inner {
    language: String,
    token: CancellationToken,
    tracker: TaskTracker,
    requested: AtomicBool,
}

/// Owns the cancellation token shared by a session's listeners and tracks
/// the listener tasks, so that teardown can wait for all of them.
#[derive(Clone)]
pub struct ShutdownCoordinator {
    inner: Arc<Inner>,
}

impl ShutdownCoordinator {
    pub fn new(language: &str) -> Self {
        Self {
            inner: Arc::new(Inner {
                language: language.to_string(),
                token: CancellationToken::new(),
                tracker: TaskTracker::new(),
                requested: AtomicBool::new(false),
            }),
        }
    }

    /// The token every listener watches.
    pub fn token(&self) -> CancellationToken {
        self.inner.token.clone()
    }

    /// Run a listener as a tracked task.
    pub fn spawn<F>(&self, task: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.inner.tracker.spawn(task)
    }

    /// Move the session into `ShuttingDown`. Returns true only for the call
    /// that actually cancelled the token; later requests are no-ops.
    pub fn request_shutdown(&self, reason: &str) -> bool {
        if self.inner.requested.swap(true, Ordering::SeqCst) {
            log::trace!(
                "[kernel {}] Shutdown already requested; ignoring ({})",
                self.inner.language,
                reason
            );
            return false;
        }
        log::info!(
            "[kernel {}] Shutting down session: {}",
            self.inner.language,
            reason
        );
        self.inner.token.cancel();
        true
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.inner.token.is_cancelled()
    }

    pub fn phase(&self) -> SessionPhase {
        if !self.inner.token.is_cancelled() {
            SessionPhase::Running
        } else if self.inner.tracker.is_empty() {
            SessionPhase::Stopped
        } else {
            SessionPhase::ShuttingDown
        }
    }

    /// Wait for every listener to exit, for at most `grace`. Returns whether
    /// the session reached `Stopped` in time.
    pub async fn wait_stopped(&self, grace: Duration) -> bool {
        self.inner.tracker.close();
        let stopped = tokio::time::timeout(grace, self.inner.tracker.wait())
            .await
            .is_ok();
        if stopped {
            log::debug!("[kernel {}] All listeners stopped", self.inner.language);
        } else {
            log::warn!(
                "[kernel {}] {} listener(s) still running after {:?}",
                self.inner.language,
                self.inner.tracker.len(),
                grace
            );
        }
        stopped
    }
}
