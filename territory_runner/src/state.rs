//! Run state owned by the coordinator.

use crate::cancel::CancelToken;
use territory_env::RunStatus;
use tracing::warn;

/// Status, position and cancel flag of one run.
///
/// Only the coordinator mutates this; the outside world sees it through
/// events and can only set the cancel flag.
#[derive(Debug, Clone)]
pub struct ProcessingState {
    status: RunStatus,
    
    /// Zero-based row being processed
    current: usize,
    
    /// Rows in the territory table (0 until loaded)
    total: usize,
    
    cancel: CancelToken,
}

impl ProcessingState {
    pub fn new(cancel: CancelToken) -> Self {
        Self {
            status: RunStatus::Idle,
            current: 0,
            total: 0,
            cancel,
        }
    }
    
    pub fn status(&self) -> RunStatus {
        self.status
    }
    
    pub fn current(&self) -> usize {
        self.current
    }
    
    pub fn total(&self) -> usize {
        self.total
    }
    
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
    
    /// `Idle → Running`.
    pub fn start(&mut self) {
        self.transition(RunStatus::Running);
    }
    
    pub fn set_total(&mut self, total: usize) {
        self.total = total;
    }
    
    pub fn enter_row(&mut self, index: usize) {
        self.current = index;
    }
    
    /// `Running → Completed | Cancelled | Failed`.
    pub fn finish(&mut self, status: RunStatus) {
        self.transition(status);
    }
    
    fn transition(&mut self, to: RunStatus) {
        let allowed = match (self.status, to) {
            (RunStatus::Idle, RunStatus::Running) => true,
            (RunStatus::Running, to) => to.is_terminal(),
            _ => false,
        };
        if allowed {
            self.status = to;
        } else {
            warn!("Ignoring state change {} -> {}", self.status, to);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    
    #[test]
    fn test_lifecycle() {
        let mut state = ProcessingState::new(CancelToken::new());
        assert_eq!(state.status(), RunStatus::Idle);
        
        state.start();
        state.set_total(5);
        state.enter_row(2);
        assert_eq!(state.status(), RunStatus::Running);
        assert_eq!((state.current(), state.total()), (2, 5));
        
        state.finish(RunStatus::Cancelled);
        assert_eq!(state.status(), RunStatus::Cancelled);
    }
    
    #[test]
    fn test_terminal_state_is_final() {
        let mut state = ProcessingState::new(CancelToken::new());
        state.finish(RunStatus::Completed);
        assert_eq!(state.status(), RunStatus::Idle);
        
        state.start();
        state.finish(RunStatus::Failed);
        state.finish(RunStatus::Completed);
        state.start();
        assert_eq!(state.status(), RunStatus::Failed);
    }
    
    #[test]
    fn test_observes_cancel_token() {
        let token = CancelToken::new();
        let state = ProcessingState::new(token.clone());
        token.cancel();
        assert!(state.is_cancelled());
    }
}
