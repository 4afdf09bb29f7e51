//! Simulation core of a voxel world server: chunk actors, block lighting, region storage and
//! the world actors routing requests between them.

pub mod block;
pub mod chunk;
pub mod config;
pub mod err;
pub mod generator;
pub(crate) mod protocol_types;
pub mod region;
pub mod world;

pub use config::Config;
pub use err::WorldError;
pub use world::{WorldHandle, WorldRegistry};
