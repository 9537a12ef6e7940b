//! Blob backend client, durable registry, and retry policy.

pub mod backend;
pub mod registry;
pub mod retry;
