//! HSM copy agent: moves file data between a distributed filesystem and a
//! POSIX archive backing store, acting on action requests from a
//! coordinator (spec.md §1).
//!
//! The daemon mode dispatches archive/restore/remove/cancel actions
//! concurrently (see [`dispatch::run`]); the admin modes under [`admin`]
//! perform one-shot archive-tree maintenance (import, rebind, max-sequence
//! discovery) without the coordinator's action-list protocol.

pub mod admin;
pub mod attrs;
pub mod cli;
pub mod config;
pub mod coordinator;
pub mod copy_engine;
pub mod dispatch;
pub mod error;
pub mod fid;
pub mod handlers;
pub mod nbio;
pub mod setup;
pub mod shadow;
pub mod stats;
pub mod stripe;

pub use error::{HsmError, Result};
