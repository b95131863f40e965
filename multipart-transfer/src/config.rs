/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use std::fmt;
use std::sync::Arc;

use crate::backend::BackendClient;
use crate::error::{self, Error};
use crate::types::{ConcurrencySetting, PartSize};

pub(crate) mod loader;

/// Configuration for a [`Client`](crate::client::Client)
#[derive(Clone)]
pub struct Config {
    target_part_size: PartSize,
    concurrency: ConcurrencySetting,
    client: Arc<dyn BackendClient>,
}

impl Config {
    /// Create a new `Config` builder
    pub fn builder() -> Builder {
        Builder::default()
    }

    /// Returns a reference to the target part size to use for uploads
    pub fn part_size(&self) -> &PartSize {
        &self.target_part_size
    }

    /// Returns the concurrency setting to use for part transfers.
    ///
    /// This is the maximum number of in-flight part transfers of a single upload.
    pub fn concurrency(&self) -> &ConcurrencySetting {
        &self.concurrency
    }

    /// The backend client that will be used to execute requests.
    pub fn client(&self) -> &Arc<dyn BackendClient> {
        &self.client
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("target_part_size", &self.target_part_size)
            .field("concurrency", &self.concurrency)
            .field("client", &self.client)
            .finish()
    }
}

/// Fluent style builder for [Config]
#[derive(Clone, Default)]
pub struct Builder {
    target_part_size: PartSize,
    concurrency: ConcurrencySetting,
    client: Option<Arc<dyn BackendClient>>,
}

impl Builder {
    /// The target size of each part.
    ///
    /// The size is validated against the workflow's constraints when an upload is
    /// initiated. Individual uploads may override it.
    ///
    /// Default is [PartSize::Auto]
    pub fn part_size(mut self, part_size: PartSize) -> Self {
        self.target_part_size = part_size;
        self
    }

    /// Set the concurrency setting this client should use.
    ///
    /// This sets the maximum number of in-flight part transfers per upload.
    /// Default is [ConcurrencySetting::Auto].
    pub fn concurrency(mut self, concurrency: ConcurrencySetting) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Set the backend client to use.
    ///
    /// NOTE: This field is required.
    pub fn client(mut self, client: impl BackendClient + 'static) -> Self {
        self.client = Some(Arc::new(client));
        self
    }

    /// Set a shared backend client to use.
    pub fn shared_client(mut self, client: Arc<dyn BackendClient>) -> Self {
        self.client = Some(client);
        self
    }

    /// Consumes the builder and constructs a [`Config`]
    pub fn build(self) -> Result<Config, Error> {
        if let ConcurrencySetting::Explicit(0) = self.concurrency {
            return Err(error::invalid_configuration(
                "concurrency must be at least 1",
            ));
        }
        if let PartSize::Target(0) = self.target_part_size {
            return Err(error::invalid_configuration("part size must be positive"));
        }
        let client = self
            .client
            .ok_or_else(|| error::invalid_configuration("a backend client is required"))?;

        Ok(Config {
            target_part_size: self.target_part_size,
            concurrency: self.concurrency,
            client,
        })
    }
}

impl fmt::Debug for Builder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Builder")
            .field("target_part_size", &self.target_part_size)
            .field("concurrency", &self.concurrency)
            .field("client", &self.client.is_some())
            .finish()
    }
}
