//! Convoy Dispatch - placement and multi-cluster delivery
//!
//! This crate decides which clusters an application revision lands on and
//! applies it there:
//! - [`resolve_placement`] turns topology policies into a [`PlacementDecision`]
//! - [`Dispatcher`] fans the revision out to every placed cluster concurrently
//! - [`ResourceTracker`] remembers what we own where, for pruning and cleanup

pub mod applier;
pub mod dispatcher;
pub mod error;
pub mod memory;
pub mod placement;
pub mod registry;
pub mod tracker;

pub use applier::{ApplyOutcome, ResourceApplier};
pub use dispatcher::{
    DispatchAggregate, DispatchConfig, DispatchReport, Dispatcher, TargetOutcome, TargetResult,
};
pub use error::{ApplyError, PlacementError, PlacementResult};
pub use memory::InMemoryFleet;
pub use placement::{active_topology_policies, resolve_placement, Placement, PlacementDecision};
pub use registry::{ClusterRegistry, InMemoryClusterRegistry};
pub use tracker::{ResourceTracker, TrackedResources};
