//! vigil-core — validation engine for the vigil service monitor.
//!
//! Provides:
//! - `model` — services, rules, per-service observation state
//! - `predicate` — quantified comparisons shared by all rule checkers
//! - `event` — event kinds, states and the sink contract
//! - `platform` — collaborator traits (filesystem, processes, sockets,
//!   programs) with a real Linux implementation and an in-memory mock
//! - `validate` — the per-cycle validator: scheduling, per-type service
//!   checkers, rule evaluation, probes
//!
//! The engine is synchronous and single-threaded within a cycle: the
//! validator walks the service list in order, collects fresh data through
//! the platform, evaluates each service's rules and posts state-transition
//! events to the configured sink. Alerting, the control surface and
//! daemonization live outside this crate.

pub mod event;
pub mod model;
pub mod platform;
pub mod predicate;
pub mod validate;

pub use event::{Event, EventKind, EventSink, EventState};
pub use model::{Service, ServiceType};
pub use validate::Validator;
