//! Single-flight scheduling of update runs.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{run_update, ChannelProgress, ProgressEvent, UpdateDeps, UpdateError, UpdateOutcome, UpdateRequest};

/// Starts runs on the tokio runtime, at most one at a time.
#[derive(Clone)]
pub struct UpdateManager {
    deps: Arc<UpdateDeps>,
    active: Arc<AtomicBool>,
}

/// Clears the active flag however the run task ends.
struct ActiveGuard(Arc<AtomicBool>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl UpdateManager {
    pub fn new(deps: UpdateDeps) -> Self {
        Self {
            deps: Arc::new(deps),
            active: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn start(&self, request: UpdateRequest) -> Result<RunHandle, UpdateError> {
        if self
            .active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!(?request, "update rejected, another run is active");
            return Err(UpdateError::Busy);
        }
        let guard = ActiveGuard(self.active.clone());

        let id = Uuid::new_v4();
        let cancel = CancellationToken::new();
        let (tx, rx) = mpsc::unbounded_channel();
        let deps = self.deps.clone();
        let token = cancel.clone();
        let task = tokio::spawn(async move {
            let _guard = guard;
            let sink = ChannelProgress::new(tx);
            run_update(&deps, request, id, &token, &sink).await
        });

        Ok(RunHandle {
            id,
            cancel,
            progress: Some(rx),
            task,
        })
    }
}

/// A started run.
pub struct RunHandle {
    id: Uuid,
    cancel: CancellationToken,
    progress: Option<mpsc::UnboundedReceiver<ProgressEvent>>,
    task: JoinHandle<Result<UpdateOutcome, UpdateError>>,
}

impl RunHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Ask the run to stop at its next checkpoint.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Progress stream; available once per handle.
    pub fn progress(&mut self) -> Option<mpsc::UnboundedReceiver<ProgressEvent>> {
        self.progress.take()
    }

    pub async fn wait(self) -> Result<UpdateOutcome, UpdateError> {
        match self.task.await {
            Ok(result) => result,
            Err(err) => {
                warn!(run_id = %self.id, %err, "update task did not complete");
                Err(UpdateError::Aborted(err.to_string()))
            }
        }
    }
}
