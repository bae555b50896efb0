//! Migrates content-addressed CAR shards from a legacy object store into a
//! new content-addressed store and rebuilds the block-level lookup index
//! that points readers at the new location.
//!
//! The three data-plane operations (`worker::hash`, `worker::copy`,
//! `worker::reindex`) are pure functions of their request and the adapters
//! they are given; `api` is a thin HTTP invocation surface over them.

pub mod api;
pub mod car;
pub mod config;
pub mod errors;
pub mod model;
pub mod objectio;
pub mod rope;
pub mod sindex;
pub mod table;
pub mod tee;
pub mod worker;
