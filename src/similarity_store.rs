//! High-level API for indexing and fuzzy retrieval of documents.
//!
//! [`SimilarityStore`] wires the whole pipeline together: tokenize, minhash,
//! LSH, storage. Its configuration is persisted through the storage backend
//! on first initialization, so a store can later be reconstructed from the
//! backend alone with [`SimilarityStore::load_from_storage`].

use std::collections::HashSet;
use std::sync::Arc;

use tracing::debug;

use crate::error::StoreError;
use crate::lsh::{Lsh, LshConfig};
use crate::minhash::{MinHasher, DEFAULT_SEED};
use crate::planner::find_optimal_config;
use crate::storage::{InMemoryStore, StorageBackend, StorageLevel, StoredDocument};
use crate::tokenize::Tokenizer;

const SETTING_STORAGE_LEVEL: &str = "storage_level";
const SETTING_SIMILARITY_THRESHOLD: &str = "similarity_threshold";
const SETTING_TOKENIZE: &str = "tokenize";
const SETTING_LSH_CONFIG: &str = "lsh_config";

/// Configuration collector for a new [`SimilarityStore`].
///
/// Defaults: in-memory storage, level [`StorageLevel::MINIMAL`], word
/// 3-gram tokenizer, similarity threshold 0.75 and 5% target probabilities
/// for both error classes.
pub struct SimilarityStoreBuilder {
    storage: Option<Arc<dyn StorageBackend>>,
    storage_level: StorageLevel,
    tokenizer: Tokenizer,
    similarity_threshold: f64,
    max_false_negative_proba: f64,
    max_false_positive_proba: f64,
}

impl SimilarityStoreBuilder {
    /// Storage backend to persist into. Defaults to a fresh
    /// [`InMemoryStore`].
    pub fn storage(mut self, storage: Arc<dyn StorageBackend>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Granularity of document persistence.
    pub fn storage_level(mut self, storage_level: StorageLevel) -> Self {
        self.storage_level = storage_level;
        self
    }

    /// Tokenization strategy, built-in or custom.
    pub fn tokenizer(mut self, tokenizer: Tokenizer) -> Self {
        self.tokenizer = tokenizer;
        self
    }

    /// Minimum Jaccard similarity for two documents to count as similar.
    pub fn similarity_threshold(mut self, threshold: f64) -> Self {
        self.similarity_threshold = threshold;
        self
    }

    /// Target probability of missing a similar document. Lower values cost
    /// more hashing and storage.
    pub fn max_false_negative_proba(mut self, proba: f64) -> Self {
        self.max_false_negative_proba = proba;
        self
    }

    /// Target probability of returning a dissimilar document. Lower values
    /// cost more hashing and storage.
    pub fn max_false_positive_proba(mut self, proba: f64) -> Self {
        self.max_false_positive_proba = proba;
        self
    }

    /// Plan the LSH parameters, initialize the backend and persist the
    /// configuration.
    pub async fn build(self) -> Result<SimilarityStore, StoreError> {
        let storage = self
            .storage
            .unwrap_or_else(|| Arc::new(InMemoryStore::new()));
        let lsh_config = find_optimal_config(
            self.similarity_threshold,
            self.max_false_negative_proba,
            self.max_false_positive_proba,
        );
        debug!(
            n_hashes = lsh_config.n_hashes,
            n_bands = lsh_config.n_bands,
            rows_per_band = lsh_config.rows_per_band,
            "planned lsh configuration"
        );

        storage.initialize().await?;
        storage
            .put_setting(
                SETTING_SIMILARITY_THRESHOLD,
                &self.similarity_threshold.to_string(),
            )
            .await?;
        storage
            .put_setting(SETTING_STORAGE_LEVEL, &self.storage_level.bits().to_string())
            .await?;
        storage
            .put_setting(SETTING_TOKENIZE, &self.tokenizer.descriptor())
            .await?;
        storage
            .put_setting(SETTING_LSH_CONFIG, &lsh_config.to_json())
            .await?;

        SimilarityStore::assemble(
            storage,
            self.storage_level,
            self.similarity_threshold,
            self.tokenizer,
            lsh_config,
        )
    }
}

impl Default for SimilarityStoreBuilder {
    fn default() -> Self {
        SimilarityStoreBuilder {
            storage: None,
            storage_level: StorageLevel::MINIMAL,
            tokenizer: Tokenizer::default(),
            similarity_threshold: 0.75,
            max_false_negative_proba: 0.05,
            max_false_positive_proba: 0.05,
        }
    }
}

/// Storage class for indexing and fuzzy search of documents.
pub struct SimilarityStore {
    storage_level: StorageLevel,
    similarity_threshold: f64,
    tokenizer: Tokenizer,
    minhasher: MinHasher,
    lsh: Lsh,
}

impl SimilarityStore {
    /// Start configuring a new store.
    pub fn builder() -> SimilarityStoreBuilder {
        SimilarityStoreBuilder::default()
    }

    /// Reconstruct a store from a backend that a previous
    /// [`SimilarityStoreBuilder::build`] initialized.
    ///
    /// A custom tokenizer cannot be persisted; when the stored descriptor is
    /// the `custom` sentinel the function has to be passed in again via
    /// `tokenizer`. For built-in tokenizers the argument is ignored.
    /// Missing or unparsable settings fail with
    /// [`StoreError::CorruptConfig`].
    pub async fn load_from_storage(
        storage: Arc<dyn StorageBackend>,
        tokenizer: Option<Tokenizer>,
    ) -> Result<SimilarityStore, StoreError> {
        let storage_level = required_setting(&storage, SETTING_STORAGE_LEVEL)
            .await?
            .parse::<u8>()
            .ok()
            .and_then(StorageLevel::from_bits)
            .ok_or_else(|| {
                StoreError::CorruptConfig("storage_level setting is not a valid level".into())
            })?;
        let similarity_threshold = required_setting(&storage, SETTING_SIMILARITY_THRESHOLD)
            .await?
            .parse::<f64>()
            .map_err(|e| {
                StoreError::CorruptConfig(format!("similarity_threshold setting: {e}"))
            })?;
        let tokenizer = match required_setting(&storage, SETTING_TOKENIZE).await?.as_str() {
            "custom" => tokenizer.ok_or_else(|| {
                StoreError::CorruptConfig(
                    "the tokenize function was persisted as custom and must be supplied again"
                        .into(),
                )
            })?,
            descriptor => Tokenizer::from_descriptor(descriptor)
                .map_err(|e| StoreError::CorruptConfig(format!("tokenize setting: {e}")))?,
        };
        let lsh_config =
            LshConfig::from_json(&required_setting(&storage, SETTING_LSH_CONFIG).await?)?;

        Self::assemble(
            storage,
            storage_level,
            similarity_threshold,
            tokenizer,
            lsh_config,
        )
    }

    fn assemble(
        storage: Arc<dyn StorageBackend>,
        storage_level: StorageLevel,
        similarity_threshold: f64,
        tokenizer: Tokenizer,
        lsh_config: LshConfig,
    ) -> Result<SimilarityStore, StoreError> {
        let minhasher = MinHasher::new(lsh_config.n_hashes as usize, DEFAULT_SEED);
        let lsh = Lsh::new(lsh_config, storage)?;
        Ok(SimilarityStore {
            storage_level,
            similarity_threshold,
            tokenizer,
            minhasher,
            lsh,
        })
    }

    pub fn storage_level(&self) -> StorageLevel {
        self.storage_level
    }

    pub fn similarity_threshold(&self) -> f64 {
        self.similarity_threshold
    }

    pub fn lsh_config(&self) -> &LshConfig {
        self.lsh.config()
    }

    /// Index a new document, returning the id it is stored under.
    ///
    /// A caller-supplied `document_id` overwrites idempotently. The
    /// `exact_part` partitions the index: only documents carrying the same
    /// value can ever match each other. `data` is an opaque payload that is
    /// persisted at every storage level.
    pub async fn insert(
        &self,
        document: &str,
        document_id: Option<u64>,
        exact_part: Option<&str>,
        data: Option<&str>,
    ) -> Result<u64, StoreError> {
        let tokens = self.tokenizer.tokens(document);
        let fingerprint = self.minhasher.fingerprint(&tokens);
        let stored = StoredDocument {
            id: document_id,
            document: Some(document.to_string()),
            exact_part: exact_part.map(str::to_string),
            fingerprint: Some(fingerprint),
            data: data.map(str::to_string),
        };
        let id = self.lsh.insert(stored, self.storage_level).await?;
        debug!(id, tokens = tokens.len(), "indexed document");
        Ok(id)
    }

    /// All indexed documents similar to `document`.
    ///
    /// When the storage level retains document text, candidates are
    /// validated by default: re-tokenized, checked against the similarity
    /// threshold with their true Jaccard similarity and sorted best-first.
    /// Pass `validate = Some(false)` to skip that and return the raw LSH
    /// candidates. At lower storage levels results are always unvalidated.
    pub async fn query(
        &self,
        document: &str,
        exact_part: Option<&str>,
        validate: Option<bool>,
    ) -> Result<Vec<StoredDocument>, StoreError> {
        let tokens = self.tokenizer.tokens(document);
        let fingerprint = self.minhasher.fingerprint(&tokens);
        let candidates = self.lsh.query(&fingerprint, exact_part).await?;
        debug!(candidates = candidates.len(), "queried lsh");
        if self.should_validate(validate) {
            Ok(self.filter_candidates(candidates, &tokens, exact_part))
        } else {
            Ok(candidates)
        }
    }

    /// The up to `n` most similar documents.
    ///
    /// Without validation the ranking is the LSH band-match heuristic. With
    /// validation (the default when the storage level allows it), four times
    /// `n` candidates are requested to leave room for filtering, then the
    /// true-Jaccard-ordered result is cut down to `n`.
    pub async fn query_top_n(
        &self,
        n: usize,
        document: &str,
        exact_part: Option<&str>,
        validate: Option<bool>,
    ) -> Result<Vec<StoredDocument>, StoreError> {
        let tokens = self.tokenizer.tokens(document);
        let fingerprint = self.minhasher.fingerprint(&tokens);
        if self.should_validate(validate) {
            let candidates = self.lsh.query_top_n(n * 4, &fingerprint, exact_part).await?;
            let mut filtered = self.filter_candidates(candidates, &tokens, exact_part);
            filtered.truncate(n);
            Ok(filtered)
        } else {
            self.lsh.query_top_n(n, &fingerprint, exact_part).await
        }
    }

    /// Remove the document with the given id from the index.
    ///
    /// Only usable with storage level [`StorageLevel::FINGERPRINT`] or
    /// higher, because the stored fingerprint is needed to find the bucket
    /// entries again. An unknown id is ignored unless `check_if_exists` is
    /// set.
    pub async fn remove_by_id(
        &self,
        document_id: u64,
        check_if_exists: bool,
    ) -> Result<(), StoreError> {
        if !self.storage_level.contains(StorageLevel::FINGERPRINT) {
            return Err(StoreError::InsufficientStorageLevel(
                "documents can only be removed with storage level FINGERPRINT or higher",
            ));
        }
        self.lsh.remove_by_id(document_id, check_if_exists).await
    }

    fn should_validate(&self, validate: Option<bool>) -> bool {
        self.storage_level.contains(StorageLevel::DOCUMENT) && validate != Some(false)
    }

    /// Drop candidates below the similarity threshold or with a different
    /// exact part, and sort the rest by descending (Jaccard, id).
    fn filter_candidates(
        &self,
        candidates: Vec<StoredDocument>,
        query_tokens: &HashSet<String>,
        exact_part: Option<&str>,
    ) -> Vec<StoredDocument> {
        let mut scored: Vec<(f64, StoredDocument)> = candidates
            .into_iter()
            .filter(|candidate| candidate.exact_part.as_deref() == exact_part)
            .filter_map(|candidate| {
                let text = candidate.document.as_deref()?;
                let jaccard = jaccard_similarity(query_tokens, &self.tokenizer.tokens(text));
                (jaccard >= self.similarity_threshold).then_some((jaccard, candidate))
            })
            .collect();
        scored.sort_by(|(jaccard_a, doc_a), (jaccard_b, doc_b)| {
            jaccard_b
                .total_cmp(jaccard_a)
                .then_with(|| doc_b.id.unwrap_or(0).cmp(&doc_a.id.unwrap_or(0)))
        });
        scored.into_iter().map(|(_, candidate)| candidate).collect()
    }
}

async fn required_setting(
    storage: &Arc<dyn StorageBackend>,
    key: &str,
) -> Result<String, StoreError> {
    storage
        .get_setting(key)
        .await?
        .ok_or_else(|| StoreError::CorruptConfig(format!("{key} setting is missing")))
}

fn jaccard_similarity(s1: &HashSet<String>, s2: &HashSet<String>) -> f64 {
    if s1.is_empty() && s2.is_empty() {
        return 1.0;
    }
    let intersection = s1.intersection(s2).count();
    let union = s1.len() + s2.len() - intersection;
    if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    }
}
