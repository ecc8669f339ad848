//! Storage model: persistence levels, stored documents and the backend
//! contract.
//!
//! The index drives storage exclusively through [`StorageBackend`], a small
//! async contract with three keyspaces: a settings KV, a document blob store
//! and a bucket multimap. [`InMemoryStore`] is the reference implementation;
//! persistent backends implement the same trait out of tree.

mod memory;

pub use memory::InMemoryStore;

use std::ops::{BitAnd, BitOr};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::minhash::Fingerprint;

/// Granularity of document persistence, as a set of bit flags.
///
/// The level decides which fields of a [`StoredDocument`] survive
/// serialization. `data` is always retained. Removal by id needs
/// `FINGERPRINT` or higher; validated queries need `DOCUMENT` or higher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageLevel(u8);

impl StorageLevel {
    /// Only the id and the opaque `data` payload are kept.
    pub const MINIMAL: StorageLevel = StorageLevel(1);
    /// Additionally keep the fingerprint (and the exact part), enabling
    /// removal by id.
    pub const FINGERPRINT: StorageLevel = StorageLevel(2);
    /// Additionally keep the document text, enabling validated queries.
    pub const DOCUMENT: StorageLevel = StorageLevel(4);
    /// Everything.
    pub const FULL: StorageLevel = StorageLevel(1 | 2 | 4);

    /// The raw bit-flag value, as persisted in the settings KV.
    pub fn bits(self) -> u8 {
        self.0
    }

    /// Reconstruct a level from its persisted bits.
    pub fn from_bits(bits: u8) -> Option<StorageLevel> {
        if bits == 0 || bits & !Self::FULL.0 != 0 {
            return None;
        }
        Some(StorageLevel(bits))
    }

    /// Whether every flag of `other` is set in `self`.
    pub fn contains(self, other: StorageLevel) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for StorageLevel {
    type Output = StorageLevel;

    fn bitor(self, rhs: StorageLevel) -> StorageLevel {
        StorageLevel(self.0 | rhs.0)
    }
}

impl BitAnd for StorageLevel {
    type Output = StorageLevel;

    fn bitand(self, rhs: StorageLevel) -> StorageLevel {
        StorageLevel(self.0 & rhs.0)
    }
}

impl Default for StorageLevel {
    fn default() -> Self {
        StorageLevel::MINIMAL
    }
}

/// All possible fields of an indexed document.
///
/// Which fields are actually present depends on the [`StorageLevel`] the
/// document went through on its way into storage. The id is assigned on
/// insert and stays stable for the document's lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StoredDocument {
    /// Identifier distinguishing the document from an identical one.
    pub id: Option<u64>,
    /// The content used for fuzzy matching, e.g. a full unprocessed sentence.
    pub document: Option<String>,
    /// A string which has to match exactly at query time.
    pub exact_part: Option<String>,
    /// The MinHash fingerprint of the document.
    pub fingerprint: Option<Fingerprint>,
    /// Opaque payload persisted together with the document.
    pub data: Option<String>,
}

/// On-disk layout of a document blob. The id is the storage key and never
/// part of the blob; `id_is_external` records whether it was caller-assigned.
#[derive(Serialize, Deserialize)]
struct DocumentRecord {
    document: Option<String>,
    exact_part: Option<String>,
    fingerprint: Option<Fingerprint>,
    data: Option<String>,
    id_is_external: bool,
}

impl StoredDocument {
    /// Encode the fields admitted by `level` into a compact binary blob.
    pub fn serialize(&self, level: StorageLevel) -> Result<Vec<u8>, StoreError> {
        let keep_exact = level.contains(StorageLevel::FINGERPRINT)
            || level.contains(StorageLevel::DOCUMENT);
        let record = DocumentRecord {
            document: if level.contains(StorageLevel::DOCUMENT) {
                self.document.clone()
            } else {
                None
            },
            exact_part: if keep_exact {
                self.exact_part.clone()
            } else {
                None
            },
            fingerprint: if level.contains(StorageLevel::FINGERPRINT) {
                self.fingerprint.clone()
            } else {
                None
            },
            data: self.data.clone(),
            id_is_external: self.id.is_some(),
        };
        Ok(bincode::serde::encode_to_vec(
            record,
            bincode::config::standard(),
        )?)
    }

    /// Decode a blob previously produced by [`StoredDocument::serialize`].
    ///
    /// Ids live as storage keys, so the caller passes the id back in.
    pub fn deserialize(blob: &[u8], id: u64) -> Result<StoredDocument, StoreError> {
        let (record, _): (DocumentRecord, usize) =
            bincode::serde::decode_from_slice(blob, bincode::config::standard())?;
        Ok(StoredDocument {
            id: Some(id),
            document: record.document,
            exact_part: record.exact_part,
            fingerprint: record.fingerprint,
            data: record.data,
        })
    }
}

/// Async contract between the index and a storage implementation.
///
/// Every method is a suspension point; implementations own their thread
/// safety. The index orders its writes so that queries observe a document
/// only after its bucket entries exist, and deletions only after the bucket
/// entries are gone, so backends don't need cross-keyspace atomicity.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Prepare the backend for first use.
    ///
    /// Idempotent for backends without setup work; backends that create
    /// durable structures may instead fail with
    /// [`StoreError::AlreadyInitialized`] when called twice.
    async fn initialize(&self) -> Result<(), StoreError> {
        Ok(())
    }

    /// Store a setting, overwriting any previous value.
    async fn put_setting(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Read a setting, `None` when the key was never written.
    async fn get_setting(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Store a document blob, returning its id.
    ///
    /// With a caller-supplied id this overwrites; without one the backend
    /// picks an unused 32-bit id and returns it. Callers must not depend on
    /// the shape of generated ids.
    async fn put_document(&self, blob: Vec<u8>, id: Option<u64>) -> Result<u64, StoreError>;

    /// Fetch a document blob, failing with [`StoreError::NotFound`] when the
    /// id is absent.
    async fn get_document(&self, id: u64) -> Result<Vec<u8>, StoreError>;

    /// Fetch several blobs, failing with [`StoreError::NotFound`] when any
    /// id is absent. Results are in the order of `ids`.
    async fn get_documents(&self, ids: &[u64]) -> Result<Vec<Vec<u8>>, StoreError> {
        let mut blobs = Vec::with_capacity(ids.len());
        for &id in ids {
            blobs.push(self.get_document(id).await?);
        }
        Ok(blobs)
    }

    /// Drop a document blob. Removing an absent id is a no-op.
    async fn delete_document(&self, id: u64) -> Result<(), StoreError>;

    /// Add an id to the bucket at `(band, band_hash)`.
    async fn add_to_bucket(&self, band: u32, band_hash: u32, id: u64) -> Result<(), StoreError>;

    /// All ids in the bucket at `(band, band_hash)`; empty when the bucket
    /// was never written.
    async fn get_bucket(&self, band: u32, band_hash: u32) -> Result<Vec<u64>, StoreError>;

    /// Remove an id from a bucket. Removing a non-member is a no-op.
    async fn remove_from_bucket(
        &self,
        band: u32,
        band_hash: u32,
        id: u64,
    ) -> Result<(), StoreError>;
}
