#![forbid(unsafe_code)]
//! Revisioned entity tree (repository, model, object, field) with diff overlays,
//! read caches, and command synthesis under optimistic concurrency control.
//! Everything above the in-memory backend is written against the capability
//! traits in [`traits`], so overlays and caches stack on any backend.

pub mod command;
pub mod config;
pub mod diff;
pub mod error;
pub mod event;
mod execute;
pub mod ids;
pub mod memory;
pub mod read_cache;
pub mod replay;
pub mod rw_cache;
pub mod session;
pub mod traits;
pub mod transaction;
pub mod value;

pub use command::{
    AtomicCommand, ChangeType, Command, EntityCommand, FieldCommand, Outcome, RevisionCheck,
    Transaction,
};
pub use config::CacheConfig;
pub use diff::{DiffModel, DiffObject};
pub use error::{Error, Result};
pub use event::{AtomicEvent, EntityEvent, Event, EventRevisions, FieldEvent, TransactionEvent};
pub use ids::{
    is_valid_revision, Address, EntityKind, Id, Revision, REVISION_NOT_EXISTING,
    REVISION_UNDEFINED,
};
pub use memory::{MemoryField, MemoryModel, MemoryObject, MemoryRepository};
pub use read_cache::{Knowledge, ReadCachingModel, ReadCachingRepository};
pub use replay::{apply_event, apply_events, rebuild_model};
pub use rw_cache::ReadWriteCachingModel;
pub use session::{EntityState, SessionCachedModel};
pub use traits::{
    CommandExecutor, FieldView, ObjectView, ReadableField, ReadableModel, ReadableObject,
    ReadableRepository, RevisionWritableModel, SnapshotProvider, WritableField, WritableModel,
    WritableObject, WritableRepository,
};
pub use transaction::TransactionBuilder;
pub use value::Value;
