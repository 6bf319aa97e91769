//! A small name resolution service.
//!
//! Clients open a TCP connection, send a domain key and receive the configured target, optionally
//! with a port, or `404` if the domain is unknown. Records are stored in a pluggable
//! [`RecordRepository`](repository::RecordRepository) and mirrored into an in-memory
//! [`RecordCache`](cache::RecordCache) which answers all queries.

#[macro_use]
pub mod metrics;

pub mod cache;
pub mod config;
pub mod logging;
pub mod protocol;
pub mod refresher;
pub mod repository;
pub mod server;
pub mod types;
