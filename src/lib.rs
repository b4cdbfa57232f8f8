//! EntityDB: embedded temporal database over timestamped-tag entities.
//!
//! This crate is a thin re-export of [`entitydb_api`], the only crate a host
//! process (HTTP server, CLI, embedding application) needs to depend on. The
//! storage/durability/concurrency/engine crates are internal implementation
//! layers; see each crate's docs for the layer it implements.

pub use entitydb_api::*;
