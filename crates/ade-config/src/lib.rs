//! Configuration package storage: materialize/clone/import, editable file
//! CRUD with ETag preconditions, listing, and content/dependency digests.

#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod digest;
pub mod storage;

pub use digest::{content_digest, dependency_digest};
pub use storage::{
    ConfigStorage, EntryKind, FileEntry, FileListing, ImportLimits, ListDepth, ListFilesQuery,
    Manifest, SortKey, SortOrder,
};
