//! Core types shared by every EntityDB layer: the entity/tag/timestamp data
//! model, the unified error type, and size limits.
//!
//! Nothing in this crate touches a filesystem or a lock; it is the
//! vocabulary the storage, durability, concurrency and engine crates share.

mod audit;
mod entity;
mod error;
mod limits;
mod timestamp;
mod validation;

pub use audit::{AuditEvent, AuditSink, NullAuditSink, OpKind, OpStatus};
pub use entity::{Entity, EntityId, LifecycleState, TagValue, ENTITY_ID_MAX_LEN};
pub use error::{Error, Result};
pub use limits::Limits;
pub use timestamp::Timestamp;
pub use validation::{FieldKind, FieldPattern, ValidationDescriptor};
