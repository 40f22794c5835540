//! Record persistence
//!
//! - [`repository`]: the [`RecordStore`] trait with SQLite and in-memory backends
//! - [`filter`]: chunked existence checks that turn discovered ids into a work set
//! - [`loader`]: batched, failure-isolating writes

pub mod filter;
pub mod loader;
pub mod repository;

pub use filter::{ExistenceFilter, FilterResult};
pub use loader::{BatchLoader, LoadStats};
pub use repository::{
    child_sets, create_mock_store, create_sqlite_store, write_record, ChildRows, Collection,
    MockRecordStore, RecordStore, RecordWriter, SharedRecordStore, SqliteRecordStore,
    StoreCounts,
};
