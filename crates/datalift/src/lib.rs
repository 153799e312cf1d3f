//! Datalift - batch ELT engine
//!
//! Moves operational data from paginated REST sources into a durable
//! analytical store in three stages:
//!
//! 1. **Extract**: rate-limited, resumable extraction into immutable
//!    compressed NDJSON objects ("bronze") laid out by entity, scope,
//!    ingestion date and run id.
//! 2. **Load**: idempotent bulk loading of bronze objects into Postgres
//!    staging tables via `COPY` plus conflict-key upsert.
//! 3. Normalization of staged payloads into typed tables is a downstream
//!    collaborator and not part of this crate.
//!
//! The engine is deliberately source-agnostic: an [`entity::EntityConfig`]
//! describes how one upstream collection paginates, how it is chunked over
//! time, and how its staging key is derived.

pub mod config;
pub mod db;
pub mod entity;
pub mod extract;
pub mod lake;
pub mod load;
pub mod partition;
pub mod ratelimit;
pub mod registry;
pub mod retry;
pub mod source;
pub mod watermark;

pub use datalift_common::{DataliftError, ErrorKind, Result, RunId};
