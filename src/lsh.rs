//! Locality-sensitive hash index over MinHash fingerprints.
//!
//! Fingerprints are cut into `n_bands` bands of `rows_per_band` values each.
//! Every band is reduced to a single 32-bit bucket hash; two documents become
//! query candidates of each other as soon as they collide in at least one
//! band. The index holds no mutable state of its own; all bookkeeping lives
//! behind the [`StorageBackend`] handle, so one index value can serve
//! concurrent operations.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::hash::murmur3_32;
use crate::minhash::Fingerprint;
use crate::storage::{StorageBackend, StorageLevel, StoredDocument};

/// Byte separating the band bytes from an appended exact part, so that
/// distinct exact parts can never collide into the same bucket.
const EXACT_PART_SEPARATOR: u8 = 0x2d;

/// Shape of the banding: `n_hashes` fingerprint slots cut into `n_bands`
/// bands of `rows_per_band` slots.
///
/// `n_bands * rows_per_band` may round down below `n_hashes` (the planner's
/// integer division does this); the surplus slots are simply never banded.
/// Persisted as a JSON setting and immutable for the lifetime of a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LshConfig {
    pub n_hashes: u32,
    pub n_bands: u32,
    pub rows_per_band: u32,
}

impl LshConfig {
    pub fn new(n_hashes: u32, n_bands: u32, rows_per_band: u32) -> Self {
        LshConfig {
            n_hashes,
            n_bands,
            rows_per_band,
        }
    }

    /// Check the banding shape for internal consistency.
    pub fn validate(&self) -> Result<(), StoreError> {
        if self.n_hashes == 0 || self.n_bands == 0 || self.rows_per_band == 0 {
            return Err(StoreError::invalid_input(
                "n_hashes, n_bands and rows_per_band must all be positive",
            ));
        }
        if u64::from(self.n_bands) * u64::from(self.rows_per_band) > u64::from(self.n_hashes) {
            return Err(StoreError::InvalidInput(format!(
                "banding {} x {} exceeds the {} available hashes",
                self.n_bands, self.rows_per_band, self.n_hashes
            )));
        }
        Ok(())
    }

    /// The JSON form persisted in the settings KV.
    pub fn to_json(&self) -> String {
        // A struct of three u32 cannot fail to serialize.
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Parse the persisted JSON form.
    pub fn from_json(json: &str) -> Result<Self, StoreError> {
        serde_json::from_str(json)
            .map_err(|e| StoreError::CorruptConfig(format!("lsh_config: {e}")))
    }
}

/// The bucketed index: band hashing plus storage orchestration.
pub struct Lsh {
    storage: Arc<dyn StorageBackend>,
    config: LshConfig,
}

impl Lsh {
    /// Create an index over the given storage.
    pub fn new(config: LshConfig, storage: Arc<dyn StorageBackend>) -> Result<Self, StoreError> {
        config.validate()?;
        Ok(Lsh { storage, config })
    }

    pub fn config(&self) -> &LshConfig {
        &self.config
    }

    /// Reduce one band of a fingerprint to its bucket hash.
    ///
    /// The band slice is laid out as little-endian 32-bit words; an exact
    /// part is appended after a separator byte, which partitions the bucket
    /// space per exact part.
    fn band_hash(&self, fingerprint: &Fingerprint, band: u32, exact_part: Option<&str>) -> u32 {
        let rows = self.config.rows_per_band as usize;
        let start = band as usize * rows;
        let slice = &fingerprint.as_slice()[start..start + rows];

        let mut bytes = Vec::with_capacity(4 * rows + exact_part.map_or(0, |e| e.len() + 1));
        for value in slice {
            bytes.extend_from_slice(&value.to_le_bytes());
        }
        if let Some(exact) = exact_part {
            bytes.push(EXACT_PART_SEPARATOR);
            bytes.extend_from_slice(exact.as_bytes());
        }
        murmur3_32(&bytes)
    }

    fn check_fingerprint(&self, fingerprint: &Fingerprint) -> Result<(), StoreError> {
        let needed = (self.config.n_bands * self.config.rows_per_band) as usize;
        if fingerprint.len() < needed {
            return Err(StoreError::InvalidInput(format!(
                "fingerprint has {} slots but the banding needs {}",
                fingerprint.len(),
                needed
            )));
        }
        Ok(())
    }

    /// Index a document, returning its id.
    ///
    /// The document record is written before any bucket entries, so a
    /// concurrent query never observes a bucket entry pointing at a missing
    /// document. Re-inserting with the same id is an idempotent overwrite.
    pub async fn insert(
        &self,
        document: StoredDocument,
        storage_level: StorageLevel,
    ) -> Result<u64, StoreError> {
        let fingerprint = document
            .fingerprint
            .as_ref()
            .ok_or_else(|| StoreError::invalid_input("cannot index a document without fingerprint"))?;
        self.check_fingerprint(fingerprint)?;

        let blob = document.serialize(storage_level)?;
        let id = self.storage.put_document(blob, document.id).await?;
        for band in 0..self.config.n_bands {
            let hash = self.band_hash(fingerprint, band, document.exact_part.as_deref());
            self.storage.add_to_bucket(band, hash, id).await?;
        }
        Ok(id)
    }

    /// All documents colliding with the fingerprint in at least one band.
    ///
    /// Each matching document is returned exactly once; the order is not
    /// meaningful.
    pub async fn query(
        &self,
        fingerprint: &Fingerprint,
        exact_part: Option<&str>,
    ) -> Result<Vec<StoredDocument>, StoreError> {
        self.check_fingerprint(fingerprint)?;
        let mut candidates: BTreeSet<u64> = BTreeSet::new();
        for band in 0..self.config.n_bands {
            let hash = self.band_hash(fingerprint, band, exact_part);
            candidates.extend(self.storage.get_bucket(band, hash).await?);
        }
        let ids: Vec<u64> = candidates.into_iter().collect();
        self.load_documents(&ids).await
    }

    /// The up-to-`n` candidates colliding in the most bands.
    ///
    /// Candidates are ranked by how many bands they share with the query
    /// fingerprint, ties broken by ascending id. This is a heuristic
    /// ranking; it only reflects true similarity after validation against
    /// the stored documents.
    pub async fn query_top_n(
        &self,
        n: usize,
        fingerprint: &Fingerprint,
        exact_part: Option<&str>,
    ) -> Result<Vec<StoredDocument>, StoreError> {
        self.check_fingerprint(fingerprint)?;
        let mut band_matches: HashMap<u64, u32> = HashMap::new();
        for band in 0..self.config.n_bands {
            let hash = self.band_hash(fingerprint, band, exact_part);
            for id in self.storage.get_bucket(band, hash).await? {
                *band_matches.entry(id).or_insert(0) += 1;
            }
        }

        let mut ranked: Vec<(u64, u32)> = band_matches.into_iter().collect();
        ranked.sort_by(|(id_a, count_a), (id_b, count_b)| {
            count_b.cmp(count_a).then(id_a.cmp(id_b))
        });
        ranked.truncate(n);

        let ids: Vec<u64> = ranked.into_iter().map(|(id, _)| id).collect();
        self.load_documents(&ids).await
    }

    /// Remove a document and its bucket footprint.
    ///
    /// An absent id is a quiet no-op unless `check_if_exists` is set, in
    /// which case it fails with [`StoreError::NotFound`]. The stored record
    /// must contain the fingerprint (storage level `FINGERPRINT` or higher),
    /// otherwise the bucket entries cannot be recomputed and the call fails
    /// with [`StoreError::InsufficientStorageLevel`]. Bucket entries go
    /// before the document record.
    pub async fn remove_by_id(&self, id: u64, check_if_exists: bool) -> Result<(), StoreError> {
        let blob = match self.storage.get_document(id).await {
            Ok(blob) => blob,
            Err(StoreError::NotFound(_)) if !check_if_exists => return Ok(()),
            Err(e) => return Err(e),
        };
        let document = StoredDocument::deserialize(&blob, id)?;
        let fingerprint = document.fingerprint.as_ref().ok_or(
            StoreError::InsufficientStorageLevel(
                "removal needs the stored fingerprint to recompute bucket hashes",
            ),
        )?;
        for band in 0..self.config.n_bands {
            let hash = self.band_hash(fingerprint, band, document.exact_part.as_deref());
            self.storage.remove_from_bucket(band, hash, id).await?;
        }
        self.storage.delete_document(id).await
    }

    async fn load_documents(&self, ids: &[u64]) -> Result<Vec<StoredDocument>, StoreError> {
        let blobs = self.storage.get_documents(ids).await?;
        ids.iter()
            .zip(blobs)
            .map(|(&id, blob)| StoredDocument::deserialize(&blob, id))
            .collect()
    }
}
