//! End-to-end tests driving the full pipeline: tokenize, minhash, LSH and
//! the in-memory storage backend.

use std::sync::Arc;

use simstore::{
    InMemoryStore, SimilarityStore, StorageBackend, StorageLevel, StoreError, StoredDocument,
    Tokenizer,
};

fn ids(results: &[StoredDocument]) -> Vec<u64> {
    results.iter().filter_map(|d| d.id).collect()
}

fn documents(results: &[StoredDocument]) -> Vec<Option<&str>> {
    results.iter().map(|d| d.document.as_deref()).collect()
}

#[tokio::test]
async fn insert_and_query_with_default_settings() {
    for storage_level in [
        StorageLevel::MINIMAL,
        StorageLevel::DOCUMENT,
        StorageLevel::FULL,
    ] {
        let store = SimilarityStore::builder()
            .storage_level(storage_level)
            .build()
            .await
            .unwrap();
        let sample = "Some example document";

        let id = store.insert(sample, None, None, None).await.unwrap();
        let results = store.query(sample, None, None).await.unwrap();

        assert_eq!(results.len(), 1, "level {:?}", storage_level.bits());
        assert_eq!(results[0].id, Some(id));
        if storage_level.contains(StorageLevel::DOCUMENT) {
            assert_eq!(results[0].document.as_deref(), Some(sample));
        } else {
            assert_eq!(results[0].document, None);
        }
    }
}

#[tokio::test]
async fn query_and_query_top_1_agree() {
    for storage_level in [StorageLevel::MINIMAL, StorageLevel::DOCUMENT] {
        let store = SimilarityStore::builder()
            .storage_level(storage_level)
            .build()
            .await
            .unwrap();
        let sample = "Some example document";
        store.insert(sample, None, None, None).await.unwrap();

        let results = store.query(sample, None, None).await.unwrap();
        let top_1 = store.query_top_n(1, sample, None, None).await.unwrap();
        assert_eq!(ids(&results), ids(&top_1));
    }
}

#[tokio::test]
async fn repeated_queries_are_identical() {
    let store = SimilarityStore::builder().build().await.unwrap();
    let sample = "Some example document";
    store.insert(sample, None, None, None).await.unwrap();

    let first = store.query(sample, None, None).await.unwrap();
    let second = store.query(sample, None, None).await.unwrap();
    assert_eq!(ids(&first), ids(&second));
}

#[tokio::test]
async fn insert_with_supplied_id_is_idempotent() {
    let store = SimilarityStore::builder().build().await.unwrap();
    let sample = "Some example document";

    let first = store.insert(sample, Some(77), None, None).await.unwrap();
    let second = store.insert(sample, Some(77), None, None).await.unwrap();
    assert_eq!(first, 77);
    assert_eq!(second, 77);

    let results = store.query(sample, None, None).await.unwrap();
    assert_eq!(ids(&results), [77]);
}

#[tokio::test]
async fn validated_top_n_orders_by_true_similarity() {
    let store = SimilarityStore::builder()
        .storage_level(StorageLevel::DOCUMENT)
        .tokenizer(Tokenizer::char_ngrams(1))
        .build()
        .await
        .unwrap();

    let base = "ABCDEFGHIJKLMNOPQRSTUVWXYZ";
    for suffix in ["", "1", "12", "123"] {
        store
            .insert(&format!("{base}{suffix}"), None, None, None)
            .await
            .unwrap();
    }

    let top_1 = store.query_top_n(1, base, None, Some(true)).await.unwrap();
    assert_eq!(documents(&top_1), [Some(base)]);

    let top_2 = store.query_top_n(2, base, None, Some(true)).await.unwrap();
    assert_eq!(
        documents(&top_2),
        [Some(base), Some(format!("{base}1").as_str())]
    );
}

#[tokio::test]
async fn unvalidated_query_returns_raw_candidates() {
    let store = SimilarityStore::builder()
        .storage_level(StorageLevel::DOCUMENT)
        .tokenizer(Tokenizer::char_ngrams(1))
        .build()
        .await
        .unwrap();

    let base = "ABCDEFGHIJKLMNOPQRSTUVWXYZ";
    store.insert(base, None, None, None).await.unwrap();
    store
        .insert(&format!("{base}1"), None, None, None)
        .await
        .unwrap();

    // With validation off, near-duplicates below perfect similarity stay in.
    let raw = store.query(base, None, Some(false)).await.unwrap();
    assert_eq!(raw.len(), 2);
}

#[tokio::test]
async fn remove_requires_fingerprint_level() {
    let store = SimilarityStore::builder()
        .storage_level(StorageLevel::MINIMAL)
        .build()
        .await
        .unwrap();
    let sample = "Some example document";

    let id = store.insert(sample, None, None, None).await.unwrap();
    assert!(matches!(
        store.remove_by_id(id, false).await,
        Err(StoreError::InsufficientStorageLevel(_))
    ));

    // The failed removal must not have touched the index.
    let results = store.query(sample, None, None).await.unwrap();
    assert_eq!(results.len(), 1);
}

#[tokio::test]
async fn remove_by_id_unindexes_the_document() {
    let store = SimilarityStore::builder()
        .storage_level(StorageLevel::FINGERPRINT)
        .build()
        .await
        .unwrap();
    let sample = "Some example document";

    let id = store.insert(sample, None, None, None).await.unwrap();
    store.remove_by_id(id, false).await.unwrap();
    // Unknown ids are ignored without the existence check.
    store.remove_by_id(id.wrapping_add(1), false).await.unwrap();

    let results = store.query(sample, None, None).await.unwrap();
    assert!(results.is_empty());
}

#[tokio::test]
async fn remove_with_existence_check_reports_missing_ids() {
    let store = SimilarityStore::builder()
        .storage_level(StorageLevel::FINGERPRINT)
        .build()
        .await
        .unwrap();
    let sample = "Some example document";

    let id = store.insert(sample, None, None, None).await.unwrap();
    assert!(matches!(
        store.remove_by_id(id.wrapping_add(1), true).await,
        Err(StoreError::NotFound(_))
    ));

    let results = store.query(sample, None, None).await.unwrap();
    assert_eq!(results.len(), 1);
}

#[tokio::test]
async fn exact_part_partitions_the_index() {
    let store = SimilarityStore::builder().build().await.unwrap();
    let text = "identical text in both partitions";

    let id_a = store.insert(text, None, Some("A"), None).await.unwrap();
    let id_b = store.insert(text, None, Some("B"), None).await.unwrap();

    let results = store.query(text, Some("A"), None).await.unwrap();
    assert_eq!(ids(&results), [id_a]);

    let results = store.query(text, Some("B"), None).await.unwrap();
    assert_eq!(ids(&results), [id_b]);

    let results = store.query(text, None, None).await.unwrap();
    assert!(results.is_empty());
}

#[tokio::test]
async fn reload_from_storage_restores_the_configuration() {
    let storage: Arc<InMemoryStore> = Arc::new(InMemoryStore::new());
    let sample = "Some example document";

    let id = {
        let store = SimilarityStore::builder()
            .storage(storage.clone())
            .storage_level(StorageLevel::DOCUMENT)
            .tokenizer(Tokenizer::char_ngrams(2))
            .build()
            .await
            .unwrap();
        store.insert(sample, None, None, None).await.unwrap()
    };

    let reloaded = SimilarityStore::load_from_storage(storage, None)
        .await
        .unwrap();
    let results = reloaded.query(sample, None, None).await.unwrap();

    assert_eq!(ids(&results), [id]);
    assert_eq!(results[0].document.as_deref(), Some(sample));
    assert_eq!(reloaded.storage_level(), StorageLevel::DOCUMENT);
}

#[tokio::test]
async fn reload_with_builtin_tokenizer_descriptors() {
    for tokenizer in [
        Tokenizer::word_ngrams(2),
        Tokenizer::char_ngrams(2),
        Tokenizer::char_ngrams_with_pad(2, Some('x')),
        Tokenizer::char_ngrams_with_pad(2, None),
    ] {
        let storage: Arc<InMemoryStore> = Arc::new(InMemoryStore::new());
        let sample = "Some example document";

        let id = {
            let store = SimilarityStore::builder()
                .storage(storage.clone())
                .storage_level(StorageLevel::DOCUMENT)
                .tokenizer(tokenizer)
                .build()
                .await
                .unwrap();
            store.insert(sample, None, None, None).await.unwrap()
        };

        let reloaded = SimilarityStore::load_from_storage(storage, None)
            .await
            .unwrap();
        let results = reloaded.query(sample, None, None).await.unwrap();
        assert_eq!(ids(&results), [id]);
    }
}

#[tokio::test]
async fn reload_with_custom_tokenizer_requires_the_function_again() {
    let storage: Arc<InMemoryStore> = Arc::new(InMemoryStore::new());
    let split = |s: &str| -> std::collections::HashSet<String> {
        s.split_whitespace().map(String::from).collect()
    };
    let sample = "Some example document";

    let id = {
        let store = SimilarityStore::builder()
            .storage(storage.clone())
            .storage_level(StorageLevel::DOCUMENT)
            .tokenizer(Tokenizer::custom(split))
            .build()
            .await
            .unwrap();
        store.insert(sample, None, None, None).await.unwrap()
    };

    // Without the function the persisted sentinel cannot be resolved.
    let missing = SimilarityStore::load_from_storage(storage.clone(), None).await;
    assert!(matches!(missing, Err(StoreError::CorruptConfig(_))));

    let reloaded =
        SimilarityStore::load_from_storage(storage, Some(Tokenizer::custom(split)))
            .await
            .unwrap();
    let results = reloaded.query(sample, None, None).await.unwrap();
    assert_eq!(ids(&results), [id]);
}

#[tokio::test]
async fn load_from_storage_rejects_incomplete_settings() {
    // Nothing persisted at all.
    let empty: Arc<InMemoryStore> = Arc::new(InMemoryStore::new());
    assert!(matches!(
        SimilarityStore::load_from_storage(empty, None).await,
        Err(StoreError::CorruptConfig(_))
    ));

    // Everything except the LSH shape.
    let partial: Arc<InMemoryStore> = Arc::new(InMemoryStore::new());
    partial.put_setting("storage_level", "1").await.unwrap();
    partial
        .put_setting("similarity_threshold", "0.8")
        .await
        .unwrap();
    partial
        .put_setting("tokenize", "char_ngrams(3)")
        .await
        .unwrap();
    match SimilarityStore::load_from_storage(partial, None).await {
        Err(StoreError::CorruptConfig(message)) => assert!(message.contains("lsh_config")),
        Err(other) => panic!("expected CorruptConfig, got {other:?}"),
        Ok(_) => panic!("expected CorruptConfig, got a store"),
    }

    // An unparsable storage level.
    let garbled: Arc<InMemoryStore> = Arc::new(InMemoryStore::new());
    garbled.put_setting("storage_level", "abc").await.unwrap();
    assert!(matches!(
        SimilarityStore::load_from_storage(garbled, None).await,
        Err(StoreError::CorruptConfig(_))
    ));
}

#[tokio::test]
async fn empty_documents_match_each_other() {
    let store = SimilarityStore::builder().build().await.unwrap();

    let id = store.insert("", None, None, None).await.unwrap();
    store
        .insert("an unrelated document entirely", None, None, None)
        .await
        .unwrap();

    let results = store.query("", None, None).await.unwrap();
    assert_eq!(ids(&results), [id]);
}

#[tokio::test]
async fn data_payload_is_kept_at_every_level() {
    for storage_level in [
        StorageLevel::MINIMAL,
        StorageLevel::FINGERPRINT,
        StorageLevel::DOCUMENT,
        StorageLevel::FULL,
    ] {
        let store = SimilarityStore::builder()
            .storage_level(storage_level)
            .build()
            .await
            .unwrap();
        let sample = "Some example document";

        store
            .insert(sample, None, None, Some("user payload"))
            .await
            .unwrap();
        let results = store.query(sample, None, None).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].data.as_deref(), Some("user payload"));
    }
}
