//! Copy-on-write object store, sync history, and session protocol
//! core. `file.rs` owns the on-disk allocator and commit protocol;
//! `array.rs`/`btree.rs`/`column.rs`/`table.rs`/`group.rs` build the
//! typed object-graph model on top of it; `transaction.rs` ties that
//! model to the allocator's versioning. `changeset.rs`/`history/`/
//! `sync/` implement the part of the system that keeps two realms'
//! stores in agreement.

pub mod array;
pub mod btree;
pub mod changeset;
pub mod column;
pub mod config;
pub mod error;
pub mod file;
pub mod group;
pub mod history;
pub mod spec;
pub mod sync;
pub mod table;
pub mod transaction;

pub use error::{CoreError, CoreResult};
