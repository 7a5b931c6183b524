// Lexical scoring, chunking, and persistence of the in-memory store.

use drover_memory::{ChunkRecord, RagQuery, RagStore, Retriever};

fn chunk(id: &str, content: &str) -> ChunkRecord {
    ChunkRecord {
        id: id.to_string(),
        content: content.to_string(),
        source: None,
    }
}

#[test]
fn retrieves_by_term_overlap_with_best_score_first() {
    let store = RagStore::new();
    store.add_chunk(chunk("a", "rust is a systems language")).unwrap();
    store.add_chunk(chunk("b", "python is a scripting language")).unwrap();
    store.add_chunk(chunk("c", "rust borrow checker")).unwrap();

    let results = store
        .retrieve(&RagQuery::new("rust language", 4))
        .unwrap();

    assert_eq!(results.len(), 3);
    // "a" matches both query terms; the others match one each.
    assert_eq!(results[0].id, "a");
    assert!(results[0].score > results[1].score);
}

#[test]
fn ties_break_by_insertion_order() {
    let store = RagStore::new();
    store.add_chunk(chunk("first", "alpha beta")).unwrap();
    store.add_chunk(chunk("second", "alpha beta")).unwrap();

    let results = store.retrieve(&RagQuery::new("alpha", 4)).unwrap();
    assert_eq!(results[0].id, "first");
    assert_eq!(results[1].id, "second");
}

#[test]
fn score_follows_overlap_over_sqrt_formula() {
    let store = RagStore::new();
    store.add_chunk(chunk("a", "one two three four")).unwrap();

    let results = store.retrieve(&RagQuery::new("one two", 1)).unwrap();
    // overlap=2, |Q|=2, |chunk_terms|=4 -> 2 / sqrt(8)
    let expected = 2.0 / (8.0f64).sqrt();
    assert!((results[0].score - expected).abs() < 1e-12);
}

#[test]
fn top_k_limits_results() {
    let store = RagStore::new();
    for i in 0..10 {
        store.add_chunk(chunk(&format!("c{i}"), "shared term here")).unwrap();
    }
    let results = store.retrieve(&RagQuery::new("shared", 3)).unwrap();
    assert_eq!(results.len(), 3);
}

#[test]
fn empty_query_returns_nothing() {
    let store = RagStore::new();
    store.add_chunk(chunk("a", "content")).unwrap();
    assert!(store.retrieve(&RagQuery::new("!!! ...", 4)).unwrap().is_empty());
}

#[test]
fn replacing_a_chunk_reindexes_it() {
    let store = RagStore::new();
    store.add_chunk(chunk("a", "old topic walrus")).unwrap();
    store.add_chunk(chunk("a", "new topic heron")).unwrap();

    assert_eq!(store.len(), 1);
    assert!(store.retrieve(&RagQuery::new("walrus", 4)).unwrap().is_empty());
    let results = store.retrieve(&RagQuery::new("heron", 4)).unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].content, "new topic heron");
}

#[test]
fn rejects_empty_id_or_content() {
    let store = RagStore::new();
    assert!(store.add_chunk(chunk("", "content")).is_err());
    assert!(store.add_chunk(chunk("id", "")).is_err());
}

#[test]
fn document_chunking_overlaps_and_covers_the_text() {
    let store = RagStore::new();
    let text = "x".repeat(2000);
    let chunks = store.add_document("doc", &text, 800, 120).unwrap();

    // Steps of 680 chars: [0..800), [680..1480), [1360..2000) = 3 chunks.
    assert_eq!(chunks, 3);
    assert_eq!(store.len(), 3);
}

#[test]
fn document_chunking_validates_settings() {
    let store = RagStore::new();
    assert!(store.add_document("doc", "text", 0, 0).is_err());
    assert!(store.add_document("doc", "text", 100, 100).is_err());
    assert!(store.add_document("", "text", 800, 120).is_err());
    assert!(store.add_document("doc", "", 800, 120).is_err());
}

#[test]
fn save_and_load_round_trip() {
    let store = RagStore::new();
    store.add_chunk(chunk("a", "persisted alpha")).unwrap();
    store
        .add_chunk(ChunkRecord {
            id: "b".into(),
            content: "persisted beta".into(),
            source: Some("manual".into()),
        })
        .unwrap();

    let file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
    store.save(file.path()).unwrap();

    let restored = RagStore::new();
    restored.load(file.path()).unwrap();
    assert_eq!(restored.len(), 2);

    let results = restored.retrieve(&RagQuery::new("beta", 4)).unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].source.as_deref(), Some("manual"));

    // Empty source strings round-trip back to None.
    let results = restored.retrieve(&RagQuery::new("alpha", 4)).unwrap();
    assert_eq!(results[0].source, None);
}
