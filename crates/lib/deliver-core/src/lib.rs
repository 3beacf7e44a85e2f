//! Core pipeline for docker-deliver.
//!
//! This crate owns the compose project model and loader, the container
//! engine client, and the deliver pipeline that builds service images,
//! exports them into a single archive, and emits a deployment-only manifest.

pub mod compose;
pub mod deliver;
pub mod engine;
