//! HostPilot Platform
//!
//! Core control plane providing:
//! - Project provisioning (server slot, internal domains, default environment)
//! - Service discovery reports and deterministic domain allocation
//! - Deployment queueing, dispatch to hosting servers and cancellation
//! - Usage polling and stuck deployment sweeping
//! - Realtime deployment updates over server-sent events

pub mod allocator;
pub mod api;
pub mod changeset;
pub mod collaborators;
pub mod domain;
pub mod error;
pub mod events;
pub mod handlers;
pub mod operations;
pub mod platform;
pub mod repository;
pub mod service;

pub use domain::*;
pub use error::{PlatformError, Result};
pub use platform::{Platform, PlatformDeps};
