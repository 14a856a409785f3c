use crate::codec::{CodecError, EncodedPayload, PayloadCodec, sha256_hex};
use crate::snapshot::Snapshot;
use chrono::{DateTime, Duration, Utc};
use rewind_common::{EntityRef, TransactionId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Kind of mutation a revision was captured for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    Create,
    Update,
    Destroy,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Destroy => "destroy",
        };
        f.write_str(name)
    }
}

/// Unique key of a revision: entity plus revision number.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RevisionKey {
    pub entity: EntityRef,
    pub number: u32,
}

impl fmt::Display for RevisionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.entity, self.number)
    }
}

/// Immutable record of one captured snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Revision {
    pub operation: Operation,
    pub entity: EntityRef,
    pub number: u32,
    pub payload: Vec<u8>,
    /// SHA-256 hex of `payload`.
    pub digest: String,
    pub transaction: TransactionId,
    pub created_at: DateTime<Utc>,
}

impl Revision {
    pub fn key(&self) -> RevisionKey {
        RevisionKey {
            entity: self.entity.clone(),
            number: self.number,
        }
    }

    /// Recompute the payload digest.
    pub fn verify(&self) -> bool {
        sha256_hex(&self.payload) == self.digest
    }

    pub fn decode(&self, codec: &PayloadCodec) -> Result<Snapshot, CodecError> {
        codec.decode_verified(&self.payload, &self.digest)
    }
}

/// Errors from the revision store.
#[derive(Debug, thiserror::Error)]
pub enum RevisionError {
    #[error("revision {0} already exists")]
    DuplicateRevision(RevisionKey),
    #[error("revision numbers start at 1, got {0}")]
    InvalidNumber(RevisionKey),
}

/// Retention rule applied by `RevisionStore::truncate`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Retention {
    /// Number of most recent revisions to keep.
    pub limit: Option<usize>,
    /// Revisions younger than this are never deleted.
    pub minimum_age: Option<Duration>,
}

impl Retention {
    pub fn keep(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            minimum_age: None,
        }
    }

    pub fn is_noop(&self) -> bool {
        self.limit.is_none() && self.minimum_age.is_none()
    }
}

/// Numbered revisions keyed by `(entity, number)`.
///
/// Numbers are per entity, start at 1 and only grow: a high-water mark per
/// entity survives truncation so numbers are never reused.
#[derive(Debug, Clone, Default)]
pub struct RevisionStore {
    revisions: BTreeMap<RevisionKey, Revision>,
    high_water: BTreeMap<EntityRef, u32>,
}

impl RevisionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a new revision for `entity` under the next number.
    pub fn append(
        &mut self,
        operation: Operation,
        entity: &EntityRef,
        payload: EncodedPayload,
        transaction: TransactionId,
    ) -> Result<RevisionKey, RevisionError> {
        self.append_at(operation, entity, payload, transaction, Utc::now())
    }

    /// `append` with an explicit creation time.
    pub fn append_at(
        &mut self,
        operation: Operation,
        entity: &EntityRef,
        payload: EncodedPayload,
        transaction: TransactionId,
        created_at: DateTime<Utc>,
    ) -> Result<RevisionKey, RevisionError> {
        let number = self.max_revision_number(entity) + 1;
        self.insert(Revision {
            operation,
            entity: entity.clone(),
            number,
            payload: payload.bytes,
            digest: payload.digest,
            transaction,
            created_at,
        })
    }

    /// Store an already-numbered revision.
    pub fn insert(&mut self, revision: Revision) -> Result<RevisionKey, RevisionError> {
        let key = revision.key();
        if key.number == 0 {
            return Err(RevisionError::InvalidNumber(key));
        }
        if self.revisions.contains_key(&key) {
            return Err(RevisionError::DuplicateRevision(key));
        }
        self.raise_high_water(&key.entity, key.number);
        tracing::debug!(revision = %key, operation = %revision.operation, "stored revision");
        self.revisions.insert(key.clone(), revision);
        Ok(key)
    }

    /// Raise the never-reuse mark for an entity.
    pub fn raise_high_water(&mut self, entity: &EntityRef, number: u32) {
        let mark = self.high_water.entry(entity.clone()).or_insert(0);
        *mark = (*mark).max(number);
    }

    pub fn high_water_marks(&self) -> impl Iterator<Item = (&EntityRef, u32)> {
        self.high_water.iter().map(|(e, n)| (e, *n))
    }

    pub fn get(&self, key: &RevisionKey) -> Option<&Revision> {
        self.revisions.get(key)
    }

    pub fn find(&self, entity: &EntityRef, number: u32) -> Option<&Revision> {
        self.revisions.get(&RevisionKey {
            entity: entity.clone(),
            number,
        })
    }

    /// Revisions of one entity, ascending by number.
    pub fn revisions_for<'a>(
        &'a self,
        entity: &'a EntityRef,
    ) -> impl DoubleEndedIterator<Item = &'a Revision> + 'a {
        self.revisions
            .range(Self::entity_range(entity))
            .map(|(_, r)| r)
    }

    pub fn latest(&self, entity: &EntityRef) -> Option<&Revision> {
        self.revisions
            .range(Self::entity_range(entity))
            .next_back()
            .map(|(_, r)| r)
    }

    /// Highest number ever assigned to `entity`, 0 if none.
    pub fn max_revision_number(&self, entity: &EntityRef) -> u32 {
        let stored = self.latest(entity).map_or(0, |r| r.number);
        stored.max(self.high_water.get(entity).copied().unwrap_or(0))
    }

    pub fn remove(&mut self, key: &RevisionKey) -> Option<Revision> {
        self.revisions.remove(key)
    }

    /// Apply a retention rule to one entity. Returns how many revisions were deleted.
    ///
    /// Candidates are ordered newest first and, with a minimum age, limited to
    /// revisions at least that old. The candidate at offset `limit` is the cutoff;
    /// it and every older revision of the entity are deleted.
    pub fn truncate(&mut self, entity: &EntityRef, retention: &Retention, now: DateTime<Utc>) -> usize {
        if retention.is_noop() {
            return 0;
        }
        let threshold = match retention.minimum_age {
            Some(age) => match now.checked_sub_signed(age) {
                Some(threshold) => Some(threshold),
                // Nothing can be older than the earliest representable time.
                None => return 0,
            },
            None => None,
        };
        let cutoff = self
            .revisions_for(entity)
            .rev()
            .filter(|r| threshold.is_none_or(|t| r.created_at <= t))
            .nth(retention.limit.unwrap_or(0))
            .map(|r| r.number);
        let Some(cutoff) = cutoff else {
            return 0;
        };

        let doomed: Vec<RevisionKey> = self
            .revisions_for(entity)
            .take_while(|r| r.number <= cutoff)
            .map(Revision::key)
            .collect();
        for key in &doomed {
            self.revisions.remove(key);
        }
        tracing::debug!(%entity, cutoff, deleted = doomed.len(), "truncated revisions");
        doomed.len()
    }

    pub fn len(&self) -> usize {
        self.revisions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.revisions.is_empty()
    }

    /// All revisions ordered by entity, then number.
    pub fn iter(&self) -> impl Iterator<Item = &Revision> {
        self.revisions.values()
    }

    fn entity_range(entity: &EntityRef) -> std::ops::RangeInclusive<RevisionKey> {
        RevisionKey {
            entity: entity.clone(),
            number: 0,
        }..=RevisionKey {
            entity: entity.clone(),
            number: u32::MAX,
        }
    }
}
