//! Game simulation modules

pub mod combat;
pub mod commands;
pub mod lifecycle;
pub mod snapshot;
pub mod world;

pub use lifecycle::LifecycleController;
pub use snapshot::Broadcaster;
