/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use std::sync::Arc;

use crate::backend::BackendClient;
use crate::types::ConcurrencySetting;
use crate::Config;
use crate::DEFAULT_CONCURRENCY;

/// Multipart transfer client.
#[derive(Debug, Clone)]
pub struct Client {
    pub(crate) handle: Arc<Handle>,
}

/// Whatever is needed to carry out operations, e.g. config, backend client, etc
#[derive(Debug)]
pub(crate) struct Handle {
    pub(crate) config: crate::Config,
}

impl Handle {
    /// Get the concrete number of workers to use based on the concurrency setting.
    pub(crate) fn num_workers(&self, setting: Option<&ConcurrencySetting>) -> usize {
        match setting.unwrap_or(self.config.concurrency()) {
            ConcurrencySetting::Explicit(concurrency) => (*concurrency).max(1),
            ConcurrencySetting::Auto => DEFAULT_CONCURRENCY,
        }
    }

    /// The backend client used to execute requests
    pub(crate) fn backend(&self) -> &Arc<dyn BackendClient> {
        self.config.client()
    }
}

impl Client {
    /// Creates a new client from a transfer config.
    pub fn new(config: Config) -> Client {
        let handle = Arc::new(Handle { config });
        Client { handle }
    }

    /// Returns the client's configuration
    pub fn config(&self) -> &Config {
        &self.handle.config
    }

    /// Upload a single object in parts.
    ///
    /// Constructs a fluent builder for the
    /// [`Upload`](crate::operation::upload::builders::UploadFluentBuilder) operation.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use std::error::Error;
    /// use std::path::Path;
    /// use multipart_transfer::io::ByteSource;
    /// use multipart_transfer::workflow::Workflow;
    ///
    /// async fn upload_file(
    ///     client: &multipart_transfer::Client,
    ///     path: impl AsRef<Path>
    /// ) -> Result<(), Box<dyn Error>> {
    ///     let source = ByteSource::from_path(path)?;
    ///     let handle = client.upload()
    ///         .workflow(Workflow::object_storage())
    ///         .identifier("Bucket", "my-bucket")
    ///         .identifier("Key", "my-key")
    ///         .body(source)
    ///         .initiate()?;
    ///
    ///     // initiate() only validates the request, nothing is sent until `upload()`
    ///     // is awaited. The handle can also be used to abort or inspect the upload.
    ///     let response = handle.upload().await?;
    ///     // ... do something with response
    ///     Ok(())
    /// }
    ///
    /// ```
    pub fn upload(&self) -> crate::operation::upload::builders::UploadFluentBuilder {
        crate::operation::upload::builders::UploadFluentBuilder::new(self.handle.clone())
    }
}
