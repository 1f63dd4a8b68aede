//! Coordination core for an on-demand page-rendering cache.
//!
//! Given a requested URL, this crate decides whether to serve a stored
//! snapshot, trigger a fresh render through a job broker, or fall through to
//! a live proxy fetch, while guaranteeing that concurrent requests for the
//! same resource never cause duplicate concurrent renders.
//!
//! The HTTP surface, the render workers, and the document store engine are
//! external collaborators; they plug in through the traits in [`infra`].

pub mod application;
pub mod config;
pub mod domain;
pub mod infra;
