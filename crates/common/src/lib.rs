//! Shared types for the edge control-plane workspace.
//!
//! Keep cross-crate wire types and the composed server-config schema here so
//! the control-plane and edge consumers agree on one representation.

#![warn(missing_docs)]

/// Shared API DTOs and enums for cross-crate use.
pub mod api;
/// Composed server configuration schema delivered to edge nodes.
pub mod config;
