//! Platform capability contract.
//!
//! The engine drives every platform-specific operation through
//! `PlatformClient`; one implementation is registered per platform tag
//! (cloud VM fleet, virtualization cluster, container orchestrator) at
//! startup. The engine itself never branches on platform type.

mod client;
mod registry;

pub use client::{
    InstanceState, PatchCompliance, PatchOperation, PatchRequest, PatchSummary, PlatformClient,
    RebootPolicy,
};
pub use registry::PlatformRegistry;
