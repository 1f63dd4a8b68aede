//! Collaborator contracts and runtime adapters.

pub mod broker;
pub mod proxy;
pub mod store;
pub mod telemetry;
