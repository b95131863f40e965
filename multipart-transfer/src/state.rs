/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{self, Error, ErrorKind};

/// Lifecycle status of a multipart upload.
///
/// `Constructing → Initiated → Completed`, or `Initiated → Aborted`. Transitions never
/// move backwards and both `Completed` and `Aborted` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UploadStatus {
    /// The upload has not been initiated with the backend yet
    Constructing,
    /// The backend has issued an upload session token and parts may be uploaded
    Initiated,
    /// The upload was completed
    Completed,
    /// The upload was aborted
    Aborted,
}

impl UploadStatus {
    /// Returns true if the upload can no longer change status
    pub fn is_terminal(&self) -> bool {
        matches!(self, UploadStatus::Completed | UploadStatus::Aborted)
    }

    fn can_transition_to(&self, next: UploadStatus) -> bool {
        matches!(
            (self, next),
            (UploadStatus::Constructing, UploadStatus::Initiated)
                | (UploadStatus::Initiated, UploadStatus::Completed)
                | (UploadStatus::Initiated, UploadStatus::Aborted)
        )
    }
}

impl fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = match self {
            UploadStatus::Constructing => "CONSTRUCTING",
            UploadStatus::Initiated => "INITIATED",
            UploadStatus::Completed => "COMPLETED",
            UploadStatus::Aborted => "ABORTED",
        };
        f.write_str(status)
    }
}

/// What the backend reported for a single uploaded part.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartMetadata {
    size: u64,
    checksum: String,
}

impl PartMetadata {
    /// Create new part metadata
    ///
    /// `checksum` is the backend defined verification token for the part, e.g. an ETag
    /// or a hex encoded tree hash.
    pub fn new(size: u64, checksum: impl Into<String>) -> Self {
        Self {
            size,
            checksum: checksum.into(),
        }
    }

    /// Size of the part in bytes
    pub fn size(&self) -> u64 {
        self.size
    }

    /// The verification token returned by the backend
    pub fn checksum(&self) -> &str {
        &self.checksum
    }
}

/// The resumable identity and progress record of a single multipart upload.
///
/// The state is a flat, serializable record. Persist it to resume an upload after a
/// process restart, or rebuild it from the backend with
/// [`resume_state`](crate::operation::upload::resume_state).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadState {
    id: Vec<(String, String)>,
    session_token: Option<String>,
    part_size: Option<u64>,
    status: UploadStatus,
    uploaded_parts: BTreeMap<u64, PartMetadata>,
}

impl UploadState {
    /// Create a new state for the upload identified by the given ordered identifiers
    /// (e.g. bucket and key), without the upload session token.
    pub fn new<K, V>(id: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            id: id
                .into_iter()
                .map(|(name, value)| (name.into(), value.into()))
                .collect(),
            session_token: None,
            part_size: None,
            status: UploadStatus::Constructing,
            uploaded_parts: BTreeMap::new(),
        }
    }

    /// The ordered identifiers of this upload
    pub fn id(&self) -> &[(String, String)] {
        &self.id
    }

    /// Returns the value of the identifier with the given name
    pub fn identifier(&self, name: &str) -> Option<&str> {
        self.id
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// The upload session token issued by the backend when the upload was initiated
    pub fn session_token(&self) -> Option<&str> {
        self.session_token.as_deref()
    }

    /// Set the upload session token. The token can only be set once.
    pub fn set_session_token(&mut self, token: impl Into<String>) -> Result<(), Error> {
        if let Some(existing) = &self.session_token {
            return Err(Error::new(
                ErrorKind::AlreadyInitiated,
                format!("upload session token is already set to `{existing}`"),
            ));
        }
        self.session_token = Some(token.into());
        Ok(())
    }

    /// Size of every part except possibly the last one
    pub fn part_size(&self) -> Option<u64> {
        self.part_size
    }

    /// Set the part size. The part size can only be set once.
    pub fn set_part_size(&mut self, part_size: u64) -> Result<(), Error> {
        if let Some(existing) = self.part_size {
            return Err(Error::new(
                ErrorKind::AlreadySized,
                format!("part size is already set to {existing} bytes"),
            ));
        }
        if part_size == 0 {
            return Err(error::invalid_configuration("part size must be positive"));
        }
        self.part_size = Some(part_size);
        Ok(())
    }

    /// Current status of the upload
    pub fn status(&self) -> UploadStatus {
        self.status
    }

    /// Move the upload to the next status
    pub fn set_status(&mut self, status: UploadStatus) -> Result<(), Error> {
        if !self.status.can_transition_to(status) {
            return Err(error::invalid_transition(self.status, status));
        }
        self.status = status;
        Ok(())
    }

    /// Record a part as uploaded.
    ///
    /// Recording the same part number again replaces the previous metadata.
    pub fn mark_part_uploaded(
        &mut self,
        part_number: u64,
        metadata: PartMetadata,
    ) -> Result<(), Error> {
        if self.status != UploadStatus::Initiated {
            return Err(error::not_initiated(format!(
                "cannot record part {part_number} while the upload is {}",
                self.status
            )));
        }
        if part_number == 0 {
            return Err(error::invalid_configuration("part numbers start at 1"));
        }
        self.uploaded_parts.insert(part_number, metadata);
        Ok(())
    }

    /// Returns true if the given part is recorded as uploaded
    pub fn has_part(&self, part_number: u64) -> bool {
        self.uploaded_parts.contains_key(&part_number)
    }

    /// All recorded parts, keyed by part number
    pub fn uploaded_parts(&self) -> &BTreeMap<u64, PartMetadata> {
        &self.uploaded_parts
    }

    /// Recorded parts in ascending part number order
    pub fn ordered_parts(&self) -> Vec<(u64, &PartMetadata)> {
        self.uploaded_parts
            .iter()
            .map(|(number, metadata)| (*number, metadata))
            .collect()
    }

    /// Returns the recorded parts in ascending order after verifying they are numbered
    /// `1..=n` without gaps.
    pub fn contiguous_parts(&self) -> Result<Vec<(u64, &PartMetadata)>, Error> {
        let parts = self.ordered_parts();
        if parts.is_empty() {
            return Err(error::incomplete_part_set("no parts have been uploaded"));
        }
        let mut expected = 1;
        for (number, _) in &parts {
            if *number != expected {
                return Err(error::incomplete_part_set(format!(
                    "part {expected} is missing, found part {number} instead"
                )));
            }
            expected += 1;
        }
        Ok(parts)
    }

    /// Verify the recorded parts are exactly the `part_count` parts of the source,
    /// numbered `1..=part_count`.
    pub fn verify_part_count(&self, part_count: u64) -> Result<(), Error> {
        let parts = self.contiguous_parts()?;
        let recorded = parts.len() as u64;
        if recorded < part_count {
            return Err(error::incomplete_part_set(format!(
                "part {} is missing, the source has {part_count} part(s)",
                recorded + 1
            )));
        }
        if recorded > part_count {
            return Err(error::incomplete_part_set(format!(
                "part {recorded} is recorded but the source only has {part_count} part(s)"
            )));
        }
        Ok(())
    }

    pub(crate) fn uploaded_part_numbers(&self) -> BTreeSet<u64> {
        self.uploaded_parts.keys().copied().collect()
    }

    /// Returns true if the upload has been initiated and is not finalized
    pub fn is_initiated(&self) -> bool {
        self.status == UploadStatus::Initiated
    }

    /// Returns true if the upload has been completed
    pub fn is_completed(&self) -> bool {
        self.status == UploadStatus::Completed
    }

    /// Returns true if the upload has been aborted
    pub fn is_aborted(&self) -> bool {
        self.status == UploadStatus::Aborted
    }
}
