//! Convoy Revision - immutable, numbered snapshots of rendered Applications
//!
//! A revision is created whenever the fingerprint of a render differs from the
//! latest stored one. Numbers are allocated with compare-and-swap semantics and
//! never reused. Live state pins the revisions it depends on; [`collect_garbage`]
//! trims the unpinned tail.

pub mod error;
pub mod fingerprint;
pub mod gc;
pub mod memory;
pub mod store;

pub use error::{Result, RevisionError};
pub use fingerprint::{component_hash, fingerprint};
pub use gc::{collect_garbage, GcReport, Retention};
pub use memory::InMemoryRevisionStore;
pub use store::{
    cluster_pin, RevisionDraft, RevisionStore, RevisionSummary, PIN_ROLLOUT, PIN_STATUS,
};
