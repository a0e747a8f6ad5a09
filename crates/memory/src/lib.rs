//! Tiered memory: core / working / archival / recall.
//!
//! All mutation flows through a single-writer actor ([`actor`]); callers
//! hold a cheap [`MemoryHandle`] and receive snapshots. Core memory is
//! always prefixed to any assembled context; working memory is a bounded
//! FIFO whose evictions become archival entries; archival memory is
//! searchable and periodically consolidated; recall memory is an episodic
//! journal.

pub mod actor;
pub mod archival;
pub mod core_mem;
pub mod store;
pub mod working;

pub use actor::{MemoryHandle, spawn};
pub use archival::ConsolidationReport;
pub use core_mem::{CoreMemory, CoreSection};
pub use store::SqliteMemoryStore;
pub use working::WorkingMemory;
