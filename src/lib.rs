//! Approximate near-duplicate text search at scale.
//!
//! `simstore` indexes documents by MinHash fingerprint in a
//! locality-sensitive hash (LSH) structure and answers the question: which
//! indexed documents have a Jaccard similarity of at least the configured
//! threshold to this query document? Retrieval is sub-linear in the corpus
//! size at the price of bounded false-positive and false-negative
//! probabilities, both of which are tunable.
//!
//! The pipeline is: tokenize the document into a shingle set, minhash the
//! set into a fixed-width fingerprint, cut the fingerprint into bands and
//! bucket each band hash. Querying walks the same path and unions the
//! buckets it touches. All persistence goes through the async
//! [`StorageBackend`] contract; [`InMemoryStore`] is the bundled reference
//! implementation.
//!
//! ## Quick start
//!
//! ```no_run
//! use simstore::{SimilarityStore, StorageLevel, Tokenizer};
//!
//! # async fn demo() -> Result<(), simstore::StoreError> {
//! let store = SimilarityStore::builder()
//!     .storage_level(StorageLevel::DOCUMENT)
//!     .tokenizer(Tokenizer::char_ngrams(3))
//!     .similarity_threshold(0.7)
//!     .build()
//!     .await?;
//!
//! let id = store.insert("the quick brown fox", None, None, None).await?;
//! let matches = store.query("the quick brown fox!", None, None).await?;
//! assert_eq!(matches[0].id, Some(id));
//! # Ok(())
//! # }
//! ```
//!
//! ## Choosing a storage level
//!
//! The [`StorageLevel`] decides which document fields the backend keeps and
//! therefore which operations are available: [`StorageLevel::MINIMAL`]
//! supports insert and query only, [`StorageLevel::FINGERPRINT`] adds
//! removal by id, [`StorageLevel::DOCUMENT`] adds validated (exact-Jaccard)
//! query results, and [`StorageLevel::FULL`] is all of the above.
//!
//! ## Reloading
//!
//! A store persists its configuration (storage level, similarity threshold,
//! tokenizer descriptor and LSH shape) into the backend's settings keyspace,
//! so an existing index reopens without repeating any parameters via
//! [`SimilarityStore::load_from_storage`]. Only custom
//! tokenizer functions cannot travel through storage and must be supplied
//! again.

pub mod hash;
pub mod tokenize;

mod error;
mod lsh;
mod minhash;
mod planner;
mod similarity_store;
mod storage;

pub use error::StoreError;
pub use lsh::{Lsh, LshConfig};
pub use minhash::{Fingerprint, MinHasher, DEFAULT_SEED};
pub use planner::find_optimal_config;
pub use similarity_store::{SimilarityStore, SimilarityStoreBuilder};
pub use storage::{InMemoryStore, StorageBackend, StorageLevel, StoredDocument};
pub use tokenize::Tokenizer;
