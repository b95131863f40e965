/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use std::fmt;

use bytes::Bytes;
use sha2::{Digest, Sha256};

mod tree_hash;

pub use self::tree_hash::TreeHash;

/// Digest algorithms a workflow can require for each part.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum DigestKind {
    /// Plain SHA-256 over the part contents
    Sha256,
    /// SHA-256 tree hash over 1 MiB chunks of the part contents
    TreeHash,
}

impl DigestKind {
    pub(crate) fn hasher(&self) -> Box<dyn Hasher> {
        match self {
            DigestKind::Sha256 => Box::new(Sha256::new()),
            DigestKind::TreeHash => Box::new(TreeHash::new()),
        }
    }

    /// Compute the digest of `data` in one pass
    pub fn digest(&self, data: &[u8]) -> Bytes {
        let mut hasher = self.hasher();
        hasher.update(data);
        hasher.finish()
    }
}

impl fmt::Display for DigestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DigestKind::Sha256 => f.write_str("sha256"),
            DigestKind::TreeHash => f.write_str("tree-hash"),
        }
    }
}

/// Incremental digest computation behind a [`DigestKind`]
pub(crate) trait Hasher: Send {
    fn update(&mut self, data: &[u8]);

    fn finish(self: Box<Self>) -> Bytes;
}

impl Hasher for Sha256 {
    fn update(&mut self, data: &[u8]) {
        Digest::update(self, data);
    }

    fn finish(self: Box<Self>) -> Bytes {
        Bytes::copy_from_slice(&(*self).finalize())
    }
}

impl Hasher for TreeHash {
    fn update(&mut self, data: &[u8]) {
        TreeHash::update(self, data);
    }

    fn finish(self: Box<Self>) -> Bytes {
        Bytes::copy_from_slice(&(*self).complete())
    }
}

/// Digests computed for a single part, keyed by [`DigestKind`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartDigests {
    sha256: Option<Bytes>,
    tree_hash: Option<Bytes>,
}

impl PartDigests {
    /// Compute every requested digest over `data`
    pub(crate) fn compute(kinds: &[DigestKind], data: &[u8]) -> Self {
        let mut digests = PartDigests::default();
        for kind in kinds {
            digests.set(*kind, kind.digest(data));
        }
        digests
    }

    /// Returns the raw digest of the given kind, if computed
    pub fn get(&self, kind: DigestKind) -> Option<&Bytes> {
        match kind {
            DigestKind::Sha256 => self.sha256.as_ref(),
            DigestKind::TreeHash => self.tree_hash.as_ref(),
        }
    }

    /// Returns the lowercase hex encoding of the digest of the given kind, if computed
    pub fn hex(&self, kind: DigestKind) -> Option<String> {
        self.get(kind).map(hex::encode)
    }

    pub(crate) fn set(&mut self, kind: DigestKind, value: Bytes) {
        match kind {
            DigestKind::Sha256 => self.sha256 = Some(value),
            DigestKind::TreeHash => self.tree_hash = Some(value),
        }
    }

    /// Returns true if every kind in `kinds` has been computed
    pub(crate) fn contains_all(&self, kinds: &[DigestKind]) -> bool {
        kinds.iter().all(|kind| self.get(*kind).is_some())
    }
}
