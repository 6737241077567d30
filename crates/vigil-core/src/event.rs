//! Events posted by the validation engine.
//!
//! Every rule evaluation ends in exactly one event per (kind, state) pair
//! for the current checker invocation. The queue that delivers events to
//! the alert/action subsystem is external; this module only defines the
//! contract (`EventSink`) plus two in-crate sinks: a tracing-backed sink
//! for the daemon and a recording sink for tests.

use serde::Serialize;
use tracing::{info, warn};

use crate::model::ActionKind;

/// What a posted event is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Nonexist,
    Invalid,
    Data,
    Exec,
    Timeout,
    Pid,
    PPid,
    Fsflag,
    Resource,
    Permission,
    Uid,
    Gid,
    Timestamp,
    Size,
    Uptime,
    Checksum,
    Content,
    Connection,
    Icmp,
    Status,
    Action,
}

impl EventKind {
    fn bit(self) -> u32 {
        1 << (self as u32)
    }
}

/// Outcome carried by an event.
///
/// `Changed`/`ChangedNot` are used by change-detection rules,
/// `Failed`/`Succeeded` by constant-value rules and data collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventState {
    Succeeded,
    Failed,
    Changed,
    ChangedNot,
}

/// A state-transition event forwarded to the event queue.
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub service: String,
    pub kind: EventKind,
    pub state: EventState,
    pub action: ActionKind,
    pub message: String,
}

/// Set of event kinds currently in failed state for a service.
///
/// Maintained by the post path: a FAILED post sets the kind's bit, a
/// SUCCEEDED post clears it. Checkers consult it to recover sticky
/// errors (e.g. a process found running after a previous exec failure).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EventSet(u32);

impl EventSet {
    pub fn contains(&self, kind: EventKind) -> bool {
        self.0 & kind.bit() != 0
    }

    pub fn set(&mut self, kind: EventKind) {
        self.0 |= kind.bit();
    }

    pub fn clear(&mut self, kind: EventKind) {
        self.0 &= !kind.bit();
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

/// Contract with the external event queue.
///
/// The engine treats posting as fire-and-forget and idempotent on
/// identical (service, kind, state) pairs across adjacent cycles.
pub trait EventSink {
    /// Forward one event to the queue.
    fn post(&mut self, event: Event);

    /// Called once at cycle start, before any service is checked: the
    /// sink resets its per-cycle delivery state and drains anything
    /// queued from earlier cycles.
    fn process_pending(&mut self) {}
}

/// Sink that writes events to the log; failures and changes at WARN,
/// the rest at INFO.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl EventSink for LogSink {
    fn post(&mut self, event: Event) {
        match event.state {
            EventState::Failed | EventState::Changed => warn!(
                service = %event.service,
                kind = ?event.kind,
                state = ?event.state,
                action = ?event.action,
                "{}", event.message
            ),
            EventState::Succeeded | EventState::ChangedNot => info!(
                service = %event.service,
                kind = ?event.kind,
                state = ?event.state,
                "{}", event.message
            ),
        }
    }
}

/// Sink that records every posted event, for assertions in tests.
#[derive(Debug, Default)]
pub struct RecordingSink {
    pub events: Vec<Event>,
    pub drained: usize,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Events of the given kind, in post order.
    pub fn of_kind(&self, kind: EventKind) -> Vec<&Event> {
        self.events.iter().filter(|e| e.kind == kind).collect()
    }

    /// True if an event with this kind and state was posted.
    pub fn has(&self, kind: EventKind, state: EventState) -> bool {
        self.events
            .iter()
            .any(|e| e.kind == kind && e.state == state)
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }
}

impl EventSink for RecordingSink {
    fn post(&mut self, event: Event) {
        self.events.push(event);
    }

    fn process_pending(&mut self) {
        self.drained += 1;
    }
}
