//! Filesystem and persisted-model layer shared by `ade-config`, `ade-queue`,
//! and `ade-worker`: safe path composition, blob storage, and the plain
//! structs persisted to Postgres.

#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod blob;
pub mod db_auth;
pub mod model;
pub mod paths;

pub use blob::{BlobAdapter, BlobReceipt, LocalBlobAdapter, ObjectStoreBlobAdapter};
pub use db_auth::DbAuthMode;
pub use paths::PathManager;
