/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use std::fmt;

use sha2::{Digest, Sha256};

use crate::error::{self, Error};
use crate::MEBIBYTE;

const CHUNK_SIZE: usize = MEBIBYTE as usize;
const DIGEST_LEN: usize = 32;

/// SHA-256 tree hash.
///
/// Input is split into 1 MiB chunks, each chunk is hashed with SHA-256 and adjacent
/// hashes are then combined pairwise (`SHA256(left ++ right)`) level by level until a
/// single root remains. An odd trailing hash is carried to the next level unchanged.
///
/// Leaves can either be produced from raw data with [`update`](TreeHash::update) or
/// supplied directly with [`add_checksum`](TreeHash::add_checksum). The latter combines
/// per-part tree hashes into the tree hash of the whole object, which is exact whenever
/// the parts are a power-of-two multiple of 1 MiB.
#[derive(Clone, Default)]
pub struct TreeHash {
    leaves: Vec<[u8; DIGEST_LEN]>,
    chunk: Sha256,
    chunk_len: usize,
}

impl TreeHash {
    /// Create an empty tree hash
    pub fn new() -> Self {
        Self::default()
    }

    /// Compute the tree hash of `data`
    pub fn digest(data: &[u8]) -> [u8; DIGEST_LEN] {
        let mut hash = Self::new();
        hash.update(data);
        hash.complete()
    }

    /// Feed more data into the hash
    pub fn update(&mut self, mut data: &[u8]) {
        while !data.is_empty() {
            let take = (CHUNK_SIZE - self.chunk_len).min(data.len());
            self.chunk.update(&data[..take]);
            self.chunk_len += take;
            data = &data[take..];
            if self.chunk_len == CHUNK_SIZE {
                self.close_chunk();
            }
        }
    }

    /// Add a precomputed leaf hash (e.g. the tree hash of an uploaded part).
    ///
    /// A partially filled chunk from a previous [`update`](TreeHash::update) is closed
    /// into a leaf first.
    pub fn add_checksum(&mut self, digest: &[u8]) -> Result<(), Error> {
        let leaf: [u8; DIGEST_LEN] = digest.try_into().map_err(|_| {
            error::invalid_configuration(format!(
                "tree hash leaves must be {DIGEST_LEN} bytes, got {}",
                digest.len()
            ))
        })?;
        if self.chunk_len > 0 {
            self.close_chunk();
        }
        self.leaves.push(leaf);
        Ok(())
    }

    /// Add a precomputed leaf hash given as a hex string
    pub fn add_checksum_hex(&mut self, digest: &str) -> Result<(), Error> {
        let raw = hex::decode(digest).map_err(error::invalid_configuration)?;
        self.add_checksum(&raw)
    }

    /// Finish the computation and return the root hash
    pub fn complete(mut self) -> [u8; DIGEST_LEN] {
        if self.chunk_len > 0 || self.leaves.is_empty() {
            self.close_chunk();
        }

        let mut level = self.leaves;
        while level.len() > 1 {
            level = level
                .chunks(2)
                .map(|pair| match pair {
                    [left, right] => {
                        let mut hasher = Sha256::new();
                        hasher.update(left);
                        hasher.update(right);
                        hasher.finalize().into()
                    }
                    [odd] => *odd,
                    _ => unreachable!("chunks(2) yields one or two hashes"),
                })
                .collect();
        }
        level[0]
    }

    fn close_chunk(&mut self) {
        let leaf = std::mem::take(&mut self.chunk).finalize();
        self.leaves.push(leaf.into());
        self.chunk_len = 0;
    }
}

impl fmt::Debug for TreeHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TreeHash")
            .field("leaves", &self.leaves.len())
            .field("chunk_len", &self.chunk_len)
            .finish()
    }
}
