//! Handle to a run executing in the background.

use crate::cancel::CancelToken;
use crate::coordinator::RunOutcome;
use territory_env::RunEvent;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tracing::error;

/// Control surface of a background run: cancel it, read its events,
/// wait for its outcome.
///
/// The event stream always ends with a `RunEvent::Finished`, after which
/// the channel closes.
pub struct RunHandle {
    task: JoinHandle<RunOutcome>,
    events: UnboundedReceiver<RunEvent>,
    cancel: CancelToken,
    
    /// Set once `Finished` has been handed out
    drained: bool,
}

impl RunHandle {
    pub(crate) fn new(
        task: JoinHandle<RunOutcome>,
        events: UnboundedReceiver<RunEvent>,
        cancel: CancelToken,
    ) -> Self {
        Self {
            task,
            events,
            cancel,
            drained: false,
        }
    }
    
    /// Requests cooperative cancellation. The territory in progress is
    /// finished first.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
    
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }
    
    /// The raw event receiver. Yields `None` once the run has ended.
    pub fn events(&mut self) -> &mut UnboundedReceiver<RunEvent> {
        &mut self.events
    }
    
    /// Next event; `None` after `Finished` has been returned.
    pub async fn next_event(&mut self) -> Option<RunEvent> {
        if self.drained {
            return None;
        }
        let event = self.events.recv().await;
        self.drained = matches!(event, Some(RunEvent::Finished { .. }) | None);
        event
    }
    
    /// Waits for the run to end.
    pub async fn wait(self) -> RunOutcome {
        match self.task.await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("Run task ended abnormally: {}", e);
                RunOutcome::failed(format!("Error: {}", e))
            }
        }
    }
}
