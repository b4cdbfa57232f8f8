//! The boundary-facing surface of EntityDB (spec.md §6): the embedded
//! `Database`/`OpenOptions` facade, three-tier configuration loading, the
//! contract log line formatter, and input validation applied before a
//! request reaches `entitydb-engine`.
//!
//! Everything downstream (`entitydb-engine`, `entitydb-storage`,
//! `entitydb-durability`, `entitydb-concurrency`) is an implementation
//! detail this crate assembles; a host process only needs this one.

mod config;
mod database;
mod logfmt;
mod validation;

pub use config::{EngineConfig, WalSyncPolicy};
pub use database::{Database, EntityDiff, ListFilter, NewEntity, OpenOptions, TagPredicate, TimelineEvent};
pub use logfmt::LogFmtFormatter;
pub use validation::validate_entity_input;

pub use entitydb_core::{
    AuditEvent, AuditSink, Entity, EntityId, Error, LifecycleState, NullAuditSink, OpKind, OpStatus,
    Result, TagValue, Timestamp,
};
