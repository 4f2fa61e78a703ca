//! # unitfleet - systemd Service Management for Remote Fleets
//!
//! unitfleet manages systemd services on remote Linux hosts over SSH. It
//! discovers the units a host runs, starts and stops them, reads their
//! journals, deploys new services (optionally with timers) and layers
//! drop-in overrides over existing ones, with backups and rollback.
//!
//! ## Core Concepts
//!
//! - **Hosts**: Remote machines reached over a pooled SSH session
//! - **Units**: Local records of services, either discovered on a host or
//!   deployed by unitfleet
//! - **Synthesis**: Pure rendering of `.service`, `.timer` and drop-in text
//! - **Reconciliation**: Bringing local unit records in line with a host
//! - **Step plans**: Multi-command remote operations with per-step failure
//!   policy and compensation
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                           CLI Interface                              │
//! │                    (clap-based command parsing)                      │
//! └─────────────────────────────────────────────────────────────────────┘
//!                                    │
//!                                    ▼
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                          FleetManager                                │
//! │          (record lookups, policy checks, reconciliation)             │
//! └─────────────────────────────────────────────────────────────────────┘
//!          │                         │                         │
//!          ▼                         ▼                         ▼
//! ┌─────────────────┐   ┌─────────────────────┐   ┌─────────────────────┐
//! │      Store      │   │    RemoteSystemd    │   │      Synthesis      │
//! │  (hosts, units) │   │  (systemctl, files, │   │  (unit, timer and   │
//! │                 │   │   journal, drop-ins)│   │   drop-in text)     │
//! └─────────────────┘   └─────────────────────┘   └─────────────────────┘
//!                                    │
//!                                    ▼
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │               Connection Pool + Command Executor                     │
//! │            (one session per host, bounded concurrency)               │
//! └─────────────────────────────────────────────────────────────────────┘
//!                                    │
//!                                    ▼
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                         Managed Hosts                                │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use unitfleet::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
//!     let fleet = FleetManager::with_ssh(Config::default(), Arc::clone(&store));
//!
//!     let host = store.save_host(fleet.new_host("web-1.example.com", "deploy")).await?;
//!     let result = fleet.discover_units(host.id, true).await?;
//!     println!("{}", result.message);
//!
//!     fleet.shutdown().await;
//!     Ok(())
//! }
//! ```

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Re-export commonly used items in prelude
pub mod prelude {
    //! Convenient re-exports of commonly used types and traits.
    //!
    //! - **Fleet**: [`FleetManager`] and the result types of its operations
    //! - **Records**: hosts, units and the store they live in
    //! - **Synthesis**: deployment and override configuration
    //! - **Errors**: Error handling types

    // Configuration
    pub use crate::config::Config;

    // Connection types
    pub use crate::connection::{
        CommandError, CommandResult, ConnectionError, ConnectionPool, Credential, Session,
        SessionFactory, SessionTarget,
    };

    // Error handling
    pub use crate::error::{Error, Result};

    // Fleet operations
    pub use crate::fleet::{
        ApplyOptions, ConnectionTest, DiscoveryResult, FleetManager, FleetStats, OverrideOutcome,
        RemoveOptions, RemoveOutcome, RollbackOptions,
    };

    // Records
    pub use crate::model::{Host, HostStatus, ManagedUnit, RecordId, UnitSource, UnitStatus};
    pub use crate::store::{HostFilter, MemoryStore, Page, Store, UnitFilter};

    // Secrets
    pub use crate::secrets::{SecretRef, SecretResolver};

    // Unit synthesis
    pub use crate::synth::{DeployConfig, OverrideConfig, ServiceConfig, TimerConfig};

    // Remote systemd
    pub use crate::systemd::{ControlAction, LogQuery, RemoteSystemd};
}

// ============================================================================
// Core Modules
// ============================================================================

/// Error types and result aliases for unitfleet operations.
///
/// The main [`Error`](error::Error) enum separates transport failures from
/// caller mistakes, policy refusals and missing records, and maps each class
/// to a CLI exit code.
pub mod error;

/// Host and unit records.
pub mod model;

/// Persistence of host and unit records behind the [`Store`](store::Store) trait.
pub mod store;

/// Credential references and their resolution.
pub mod secrets;

// ============================================================================
// Infrastructure
// ============================================================================

/// Quoted remote shell command composition.
pub mod command;

/// Connection layer for remote host communication.
///
/// Provides the [`Session`](connection::Session) and
/// [`SessionFactory`](connection::SessionFactory) traits, a per-host session
/// pool, a bounded command executor and, with the `russh` feature, an SSH
/// session implementation.
pub mod connection;

/// Configuration management for unitfleet.
///
/// Handles loading configuration from files and environment variables:
/// SSH defaults, the remote systemd layout and logging.
pub mod config;

// ============================================================================
// systemd
// ============================================================================

/// Rendering of unit files, timers and drop-ins, and cron conversion.
pub mod synth;

/// Systemd operations on remote hosts.
///
/// Discovery, control actions, journal retrieval, deployment, removal,
/// validation and override management, each expressed as commands over a
/// pooled session.
pub mod systemd;

/// Reconciliation of discovered units with local records.
pub mod reconcile;

/// Built-in deployment presets.
pub mod templates;

// ============================================================================
// Fleet
// ============================================================================

/// The composition root tying store, pool and remote operations together.
pub mod fleet;

// ============================================================================
// Version Information
// ============================================================================

/// Returns the current version of unitfleet.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
