//! Domain records and HTTP DTOs
//!
//! `wire` holds the upstream gateway's encoding; `records` the shapes the
//! cache and the rest of the crate work with.

pub mod records;
pub mod responses;
pub mod wire;

// Re-export commonly used types
pub use records::{DissolveState, Neuron, NeuronPermission, SnsDescriptor};
pub use responses::{
    ClearResponse, CollectionStats, EntitiesResponse, HealthResponse, StatsResponse,
};
