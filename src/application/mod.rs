//! Application layer: request orchestration and the policies around it.

pub mod callback;
pub mod canonical;
pub mod classify;
pub mod deliver;
pub mod dispatch;
pub mod error;
pub mod poll;
pub mod render;
pub mod responder;
