//! Metastore Core
//!
//! This crate provides a transactional, versioned metadata repository: a
//! hierarchical node store with typed entity projections, per-node version
//! history, a structured query subsystem and provider facades for the
//! categories, feeds, datasources and job executions of a data pipeline.
//!
//! # Architecture
//!
//! - **Snapshot isolation**: every unit of work runs against an immutable
//!   snapshot and buffers its mutations until commit
//! - **Optimistic concurrency**: commits touching the same node conflict, the
//!   loser fails with a retryable error
//! - **Explicit context**: the session is passed to every provider call and
//!   entities borrow it, so nothing outlives its unit of work
//! - **Tombstone deletes**: removed nodes keep their history and ids are never reused
//!
//! # Modules
//!
//! - [`models`] - Nodes, paths, property values, versions and domain entities
//! - [`behaviors`] - Node-type registry and polymorphic construction
//! - [`mapper`] - Entity trait and typed node accessors
//! - [`db`] - Node store, sessions, transaction coordinator and events
//! - [`services`] - Providers, query service and versioning service

pub mod behaviors;
pub mod config;
pub mod db;
pub mod mapper;
pub mod models;
pub mod repository;
pub mod services;

pub use config::RepositoryConfig;
pub use repository::Repository;
