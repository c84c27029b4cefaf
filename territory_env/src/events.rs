//! Outbound event stream from a run to whatever front end is watching.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Mutex;
use tokio::sync::mpsc::UnboundedSender;

/// Lifecycle of one run.
///
/// `Idle → Running → {Completed, Cancelled, Failed}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    Idle,
    Running,
    Completed,
    Cancelled,
    Failed,
}

impl RunStatus {
    /// True once the run can no longer change state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Cancelled | RunStatus::Failed)
    }
    
    pub fn name(&self) -> &'static str {
        match self {
            RunStatus::Idle => "idle",
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Cancelled => "cancelled",
            RunStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Events produced by the coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RunEvent {
    /// About to process row `current` of `total`
    Progress {
        current: usize,
        total: usize,
        label: String,
    },
    
    /// Free-form log line
    Log(String),
    
    /// Result of loading the address source
    DataLoaded { success: bool, message: String },
    
    /// Terminal status with a human-readable summary
    Finished { status: RunStatus, summary: String },
}

/// Receiver side of the event stream.
///
/// Implementations must not block; the coordinator calls `emit` from
/// its worker thread between pipeline stages.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: RunEvent);
}

impl EventSink for UnboundedSender<RunEvent> {
    fn emit(&self, event: RunEvent) {
        // Receiver gone means nobody is listening any more.
        let _ = self.send(event);
    }
}

/// Sink that keeps every event in memory.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<RunEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }
    
    /// Returns a copy of everything recorded so far.
    pub fn events(&self) -> Vec<RunEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
    
    /// Returns all log lines in order.
    pub fn log_lines(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                RunEvent::Log(line) => Some(line),
                _ => None,
            })
            .collect()
    }
    
    /// Returns the terminal event, if the run finished.
    pub fn finished(&self) -> Option<(RunStatus, String)> {
        self.events().into_iter().rev().find_map(|e| match e {
            RunEvent::Finished { status, summary } => Some((status, summary)),
            _ => None,
        })
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: RunEvent) {
        match self.events.lock() {
            Ok(mut events) => events.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
    }
}
