pub mod batch;
pub mod delivery;
pub mod emitter;
pub mod registry;
pub mod stats;
