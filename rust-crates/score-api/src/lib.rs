//! HTTP proxy answering player score lookups from the dice game contract.

pub mod app;

pub type Result<T, E = anyhow::Error> = std::result::Result<T, E>;
