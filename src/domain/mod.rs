//! Domain layer types and invariants.

pub mod request;
pub mod site;
pub mod snapshot;
pub mod status;
