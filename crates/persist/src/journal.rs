//! File-backed revision history.
//!
//! Layout inside the journal directory:
//! ```text
//! journal.meta.json       - metadata and schema versions
//! revisions.cbor.zst      - CBOR+zstd revisions and high-water marks
//! transactions.cbor.zst   - CBOR+zstd transactions in creation order
//! integrity/
//!   manifest.json         - hash chain manifest
//! ```

use crate::codec::{
    CodecError, DEFAULT_COMPRESSION_LEVEL, cbor_deserialize, cbor_serialize, sha256_hex,
    zstd_compress, zstd_decompress,
};
use crate::revision::{Revision, RevisionError, RevisionStore};
use crate::transaction::Transaction;
use chrono::{DateTime, Utc};
use rewind_common::EntityRef;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Current schema versions.
const JOURNAL_SCHEMA_VERSION: u32 = 1;
const PAYLOAD_SCHEMA_VERSION: u32 = 1;

const META_FILE: &str = "journal.meta.json";
const REVISIONS_FILE: &str = "revisions.cbor.zst";
const TRANSACTIONS_FILE: &str = "transactions.cbor.zst";

/// Errors from journal operations.
#[derive(Debug, thiserror::Error)]
pub enum JournalError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
    #[error("revision error: {0}")]
    Revision(#[from] RevisionError),
    #[error("integrity check failed: expected {expected}, got {actual}")]
    IntegrityMismatch { expected: String, actual: String },
    #[error("schema version mismatch: file has v{file_version}, expected v{expected_version}")]
    SchemaMismatch {
        file_version: u32,
        expected_version: u32,
    },
    #[error("journal has never been saved")]
    Empty,
}

/// Metadata stored in journal.meta.json.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalMeta {
    pub journal_schema_version: u32,
    pub payload_schema_version: u32,
    pub revision_count: usize,
    pub transaction_count: usize,
    pub saved_at: Option<DateTime<Utc>>,
}

/// A single entry in the integrity manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub filename: String,
    pub sha256: String,
    pub prev_hash: Option<String>,
}

/// Integrity manifest chaining the hashes of the data files.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IntegrityManifest {
    pub entries: Vec<ManifestEntry>,
}

#[derive(Serialize, Deserialize)]
struct RevisionSegment {
    revisions: Vec<Revision>,
    high_water: Vec<(EntityRef, u32)>,
}

/// History loaded back from disk.
#[derive(Debug, Default)]
pub struct JournalContents {
    pub revisions: RevisionStore,
    pub transactions: Vec<Transaction>,
}

/// Journal directory with schema versioning and integrity checking.
pub struct Journal {
    root: PathBuf,
    meta: JournalMeta,
    manifest: IntegrityManifest,
}

impl Journal {
    /// Open or create a journal at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, JournalError> {
        let root = path.as_ref().to_path_buf();
        std::fs::create_dir_all(root.join("integrity"))?;

        let meta_path = root.join(META_FILE);
        let manifest_path = root.join("integrity").join("manifest.json");

        let (meta, manifest) = if meta_path.exists() {
            let meta: JournalMeta = serde_json::from_reader(std::fs::File::open(&meta_path)?)?;
            if meta.journal_schema_version != JOURNAL_SCHEMA_VERSION {
                return Err(JournalError::SchemaMismatch {
                    file_version: meta.journal_schema_version,
                    expected_version: JOURNAL_SCHEMA_VERSION,
                });
            }
            if meta.payload_schema_version != PAYLOAD_SCHEMA_VERSION {
                return Err(JournalError::SchemaMismatch {
                    file_version: meta.payload_schema_version,
                    expected_version: PAYLOAD_SCHEMA_VERSION,
                });
            }
            let manifest: IntegrityManifest = if manifest_path.exists() {
                serde_json::from_reader(std::fs::File::open(&manifest_path)?)?
            } else {
                IntegrityManifest::default()
            };
            (meta, manifest)
        } else {
            let meta = JournalMeta {
                journal_schema_version: JOURNAL_SCHEMA_VERSION,
                payload_schema_version: PAYLOAD_SCHEMA_VERSION,
                revision_count: 0,
                transaction_count: 0,
                saved_at: None,
            };
            let journal = Self {
                root,
                meta,
                manifest: IntegrityManifest::default(),
            };
            journal.save_meta()?;
            journal.save_manifest()?;
            return Ok(journal);
        };

        Ok(Self {
            root,
            meta,
            manifest,
        })
    }

    /// Write the full history, replacing whatever was saved before.
    pub fn save(
        &mut self,
        revisions: &RevisionStore,
        transactions: &[Transaction],
    ) -> Result<(), JournalError> {
        let segment = RevisionSegment {
            revisions: revisions.iter().cloned().collect(),
            high_water: revisions
                .high_water_marks()
                .map(|(e, n)| (e.clone(), n))
                .collect(),
        };

        self.manifest = IntegrityManifest::default();
        self.write_segment(REVISIONS_FILE, &segment)?;
        self.write_segment(TRANSACTIONS_FILE, transactions)?;

        self.meta.revision_count = segment.revisions.len();
        self.meta.transaction_count = transactions.len();
        self.meta.saved_at = Some(Utc::now());
        self.save_meta()?;
        self.save_manifest()?;
        tracing::info!(
            root = %self.root.display(),
            revisions = self.meta.revision_count,
            transactions = self.meta.transaction_count,
            "saved journal"
        );
        Ok(())
    }

    /// Load the saved history. Every file is checked against the manifest first.
    pub fn load(&self) -> Result<JournalContents, JournalError> {
        if self.meta.saved_at.is_none() {
            return Err(JournalError::Empty);
        }
        let segment: RevisionSegment = self.read_segment(REVISIONS_FILE)?;
        let transactions: Vec<Transaction> = self.read_segment(TRANSACTIONS_FILE)?;

        let mut store = RevisionStore::new();
        for revision in segment.revisions {
            if !revision.verify() {
                return Err(JournalError::IntegrityMismatch {
                    expected: revision.digest.clone(),
                    actual: sha256_hex(&revision.payload),
                });
            }
            store.insert(revision)?;
        }
        for (entity, mark) in &segment.high_water {
            store.raise_high_water(entity, *mark);
        }
        Ok(JournalContents {
            revisions: store,
            transactions,
        })
    }

    /// Verify all integrity hashes in the manifest.
    pub fn verify_integrity(&self) -> Result<(), JournalError> {
        let mut prev_hash: Option<String> = None;
        for entry in &self.manifest.entries {
            if entry.prev_hash != prev_hash {
                return Err(JournalError::IntegrityMismatch {
                    expected: prev_hash.unwrap_or_else(|| "None".into()),
                    actual: entry.prev_hash.clone().unwrap_or_else(|| "None".into()),
                });
            }
            let data = std::fs::read(self.root.join(&entry.filename))?;
            let actual = sha256_hex(&data);
            if actual != entry.sha256 {
                return Err(JournalError::IntegrityMismatch {
                    expected: entry.sha256.clone(),
                    actual,
                });
            }
            prev_hash = Some(entry.sha256.clone());
        }
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn meta(&self) -> &JournalMeta {
        &self.meta
    }

    fn write_segment<T: Serialize + ?Sized>(
        &mut self,
        filename: &str,
        value: &T,
    ) -> Result<(), JournalError> {
        let compressed = zstd_compress(&cbor_serialize(value)?, DEFAULT_COMPRESSION_LEVEL)?;
        let hash = sha256_hex(&compressed);
        let prev_hash = self.manifest.entries.last().map(|e| e.sha256.clone());
        std::fs::write(self.root.join(filename), &compressed)?;
        self.manifest.entries.push(ManifestEntry {
            filename: filename.to_owned(),
            sha256: hash,
            prev_hash,
        });
        Ok(())
    }

    fn read_segment<T: for<'de> Deserialize<'de>>(&self, filename: &str) -> Result<T, JournalError> {
        let compressed = std::fs::read(self.root.join(filename))?;
        let entry = self
            .manifest
            .entries
            .iter()
            .find(|e| e.filename == filename)
            .ok_or_else(|| JournalError::IntegrityMismatch {
                expected: format!("manifest entry for {filename}"),
                actual: "none".into(),
            })?;
        let actual = sha256_hex(&compressed);
        if entry.sha256 != actual {
            return Err(JournalError::IntegrityMismatch {
                expected: entry.sha256.clone(),
                actual,
            });
        }
        Ok(cbor_deserialize(&zstd_decompress(&compressed)?)?)
    }

    fn save_meta(&self) -> Result<(), JournalError> {
        let path = self.root.join(META_FILE);
        serde_json::to_writer_pretty(std::fs::File::create(path)?, &self.meta)?;
        Ok(())
    }

    fn save_manifest(&self) -> Result<(), JournalError> {
        let path = self.root.join("integrity").join("manifest.json");
        serde_json::to_writer_pretty(std::fs::File::create(path)?, &self.manifest)?;
        Ok(())
    }
}
