//! Convoy Controller - the application reconciliation loop
//!
//! For every Application the controller repeatedly:
//! 1. renders the spec into resources
//! 2. creates a new immutable revision when the render changed
//! 3. places and applies the revision on target clusters
//! 4. reports status conditions and events, and trims revision history
//!
//! Use [`ControllerBuilder`] to wire the stores and cluster access, then
//! [`Controller::start`] the workers and [`Controller::enqueue`] applications
//! as they change.

pub mod backoff;
pub mod builder;
pub mod config;
pub mod controller;
pub mod error;
pub mod events;
pub mod gc;
pub mod queue;
pub mod reconciler;
pub mod state;
pub mod store;

pub use backoff::Backoff;
pub use builder::ControllerBuilder;
pub use config::{BackoffConfig, ControllerConfig, DispatchSettings};
pub use controller::Controller;
pub use error::{ControllerError, Result, StoreError};
pub use events::{reason, Event, EventSink, EventType, RecordingEventSink, TracingEventSink};
pub use gc::{GcSignal, RevisionCollector};
pub use queue::WorkQueue;
pub use reconciler::{ReconcileOutcome, Reconciler, Requeue};
pub use state::{ReconcilePhase, ReconcileState};
pub use store::{ApplicationStore, InMemoryApplicationStore};
