//! Core types and services for the binmap waste collection map.

/// Message bridge to the rendering surface.
pub mod bridge;
/// Runtime configuration and environment overrides.
pub mod config;
/// Map-data coordinator owning the loaded collections.
pub mod coordinator;
/// Fail-to-empty fetch boundary.
pub mod fetch;
/// Category filters and free-text search.
pub mod filter;
/// Distances and proximity queries.
pub mod geo;
/// User location stream.
pub mod location;
/// Domain models shared by every crate.
pub mod model;
/// Validation and reshaping of raw backend records.
pub mod normalize;
/// Traits describing the external collaborators.
pub mod ports;
/// Signed-in user session.
pub mod session;
/// The two remote collection sources.
pub mod sources;

pub use bridge::*;
pub use config::*;
pub use coordinator::*;
pub use model::*;
pub use ports::*;
pub use session::*;
pub use sources::*;
