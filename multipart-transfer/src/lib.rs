/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

/* Automatically managed default lints */
#![cfg_attr(docsrs, feature(doc_auto_cfg))]
/* End of automatically managed default lints */
#![warn(
    missing_debug_implementations,
    missing_docs,
    rustdoc::missing_crate_level_docs,
    unreachable_pub,
    rust_2018_idioms
)]

//! Resumable, concurrent multipart uploads.
//!
//! Large objects are split into independently transferable parts which are uploaded
//! concurrently through a [`BackendClient`](crate::backend::BackendClient). Progress is
//! tracked in an [`UploadState`](crate::state::UploadState) which can be persisted,
//! handed back in, or rebuilt from the backend's part listing to resume an interrupted
//! upload. Backend differences (operation names, identifier fields, part sizing and
//! integrity checksums) are described by a [`Workflow`](crate::workflow::Workflow).
//!
//! # Examples
//!
//! ```no_run
//! # async fn example() -> Result<(), multipart_transfer::error::Error> {
//! use multipart_transfer::io::ByteSource;
//! use multipart_transfer::workflow::Workflow;
//!
//! let config = multipart_transfer::from_env().load().await?;
//! let client = multipart_transfer::Client::new(config);
//!
//! let handle = client
//!     .upload()
//!     .workflow(Workflow::object_storage())
//!     .identifier("Bucket", "my-bucket")
//!     .identifier("Key", "my-key")
//!     .body(ByteSource::from_path("/tmp/large-file.bin")?)
//!     .initiate()?;
//!
//! // on failure the error carries the upload state; calling `upload()` again
//! // only transfers the parts that are still missing
//! let output = handle.upload().await?;
//! # let _ = output;
//! # Ok(())
//! # }
//! ```

pub(crate) const MEBIBYTE: u64 = 1024 * 1024;

/// Default number of in-flight part transfers per upload
pub(crate) const DEFAULT_CONCURRENCY: usize = 3;

/// Error types emitted by `multipart-transfer`
pub mod error;

/// Common types used by `multipart-transfer`
pub mod types;

/// Backend capability and the bundled S3 adapter
pub mod backend;

/// Checksums and the archive tree hash
pub mod checksum;

/// Resumable upload state
pub mod state;

/// Backend workflow descriptions
pub mod workflow;

/// Types and helpers for I/O
pub mod io;

/// Transfer client
pub mod client;

/// Transfer operations
pub mod operation;

/// Client configuration
pub mod config;

pub use self::client::Client;
use self::config::loader::ConfigLoader;
pub use self::config::Config;

/// Create a config loader
pub fn from_env() -> ConfigLoader {
    ConfigLoader::default()
}
