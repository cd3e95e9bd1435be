//! Integration test verifying that `#[instrument]` annotations produce the
//! expected spans on backend and record store operations.

#![allow(clippy::expect_used)]

use std::sync::{Arc, Mutex};

use chrono::{Duration, Utc};
use tessera_storage::{
    MemoryBackend, StorageBackend, UserId,
    auth::{KvTokenRecordStore, TokenRecordStore},
    testutil::make_record,
};
use tracing::Subscriber;
use tracing_subscriber::{layer::SubscriberExt, registry::LookupSpan};

// ---------------------------------------------------------------------------
// Collecting layer: records span names as they are created
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
struct SpanCollector {
    spans: Arc<Mutex<Vec<String>>>,
}

impl<S> tracing_subscriber::Layer<S> for SpanCollector
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(
        &self,
        _attrs: &tracing::span::Attributes<'_>,
        id: &tracing::span::Id,
        ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        if let Some(span) = ctx.span(id) {
            self.spans.lock().expect("lock poisoned").push(span.name().to_owned());
        }
    }
}

fn collect() -> (SpanCollector, Arc<Mutex<Vec<String>>>) {
    let collector = SpanCollector::default();
    let spans = Arc::clone(&collector.spans);
    (collector, spans)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn memory_backend_set_creates_span() {
    let (collector, spans) = collect();
    let subscriber = tracing_subscriber::registry().with(collector);
    let _guard = tracing::subscriber::set_default(subscriber);

    let backend = MemoryBackend::new();
    backend.set(b"key-1".to_vec(), b"value-1".to_vec()).await.expect("set should succeed");

    let recorded = spans.lock().expect("lock poisoned");
    assert!(recorded.iter().any(|s| s == "set"), "expected a 'set' span, got: {recorded:?}");
}

#[tokio::test]
async fn memory_backend_transaction_commit_creates_spans() {
    let (collector, spans) = collect();
    let subscriber = tracing_subscriber::registry().with(collector);
    let _guard = tracing::subscriber::set_default(subscriber);

    let backend = MemoryBackend::new();
    let txn = backend.transaction().await.expect("transaction");
    txn.commit().await.expect("empty commit");

    let recorded = spans.lock().expect("lock poisoned");
    assert!(recorded.iter().any(|s| s == "transaction"), "got: {recorded:?}");
    assert!(recorded.iter().any(|s| s == "commit"), "got: {recorded:?}");
}

#[tokio::test]
async fn record_store_insert_nests_commit_span() {
    let (collector, spans) = collect();
    let subscriber = tracing_subscriber::registry().with(collector);
    let _guard = tracing::subscriber::set_default(subscriber);

    let store = KvTokenRecordStore::new(MemoryBackend::new());
    let record = make_record(UserId::from(1), "span", Utc::now(), Duration::days(1));
    store.insert(&record).await.expect("insert");

    let recorded = spans.lock().expect("lock poisoned");
    for expected in ["insert", "snapshot", "list_by_user", "commit"] {
        assert!(
            recorded.iter().any(|s| s == expected),
            "expected a '{expected}' span, got: {recorded:?}"
        );
    }
}

#[tokio::test]
async fn record_store_lookup_creates_span() {
    let (collector, spans) = collect();
    let subscriber = tracing_subscriber::registry().with(collector);
    let _guard = tracing::subscriber::set_default(subscriber);

    let store = KvTokenRecordStore::new(MemoryBackend::new());
    let record = make_record(UserId::from(1), "lookup", Utc::now(), Duration::days(1));
    let found = store.find_by_access_hash(&record.access_token_hash).await.expect("lookup");
    assert!(found.is_none());

    let recorded = spans.lock().expect("lock poisoned");
    assert!(recorded.iter().any(|s| s == "find_by_access_hash"), "got: {recorded:?}");
}
