//! The entity repository and write/query path for EntityDB (spec.md §3,
//! §4.6): the `Create`/`Get`/`Update`/`Delete`/`Restore`/`List`/`Query`
//! surface, the temporal query algorithms (`AsOf`/`History`/`Diff`/
//! `ChangesSince`), auto-chunking, and the low-level EUFF writer that ties
//! the storage crate's format/index types to the durability crate's
//! integrity guard and reader pool.
//!
//! `entitydb-core` owns the data model, `entitydb-storage` the byte
//! layout and live indexes, `entitydb-durability` the health/recovery
//! gating; this crate is where they're assembled into something you can
//! actually open a database through.

mod changes_index;
mod chunking;
pub mod repository;
mod replay;
pub mod temporal;
mod writer;

pub use chunking::{Chunk, ChunkedParent};
pub use repository::EntityRepository;
pub use temporal::DiffResult;
pub use writer::{AppendResult, IndexSnapshot, Writer};
