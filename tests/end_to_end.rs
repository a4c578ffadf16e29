//! Full pipeline tests against a mock HTTP server: subscribe, baseline
//! seeding, scheduled cycles, dedup across restarts, and shared
//! subscriptions.

use std::sync::Arc;

use tokio::sync::mpsc;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use feedrelay::config::Config;
use feedrelay::dispatch::{DeliveryBatch, Dispatcher};
use feedrelay::engine::Engine;
use feedrelay::store::{MemoryStateStore, SubscriptionStore};

/// RSS 2.0 document with the given item ids, newest first.
fn rss(title: &str, ids: &[&str]) -> String {
    let items: String = ids
        .iter()
        .map(|id| {
            format!(
                "<item><guid>{id}</guid><title>Post {id}</title>\
                 <link>https://example.com/{id}</link></item>"
            )
        })
        .collect();
    format!(
        "<?xml version=\"1.0\"?><rss version=\"2.0\"><channel>\
         <title>{title}</title>{items}</channel></rss>"
    )
}

fn ids(prefix: &str, range: std::ops::Range<usize>) -> Vec<String> {
    range.map(|n| format!("{prefix}{n}")).collect()
}

fn engine_with(
    persist: Arc<MemoryStateStore>,
) -> (Arc<Engine>, mpsc::Receiver<DeliveryBatch>) {
    let store = Arc::new(SubscriptionStore::open(Box::new(persist)).unwrap());
    let (dispatcher, rx) = Dispatcher::channel(16);
    let config = Config {
        fetch_timeout_secs: 5,
        ..Config::default()
    };
    let engine = Engine::new(config, store, dispatcher).unwrap();
    (engine, rx)
}

async fn serve_once(server: &MockServer, body: String) {
    Mock::given(method("GET"))
        .and(path("/feed"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .up_to_n_times(1)
        .mount(server)
        .await;
}

async fn serve(server: &MockServer, body: String) {
    Mock::given(method("GET"))
        .and(path("/feed"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_subscribe_seeds_without_delivering() {
    let server = MockServer::start().await;
    let initial = ids("item", 1..26);
    let refs: Vec<&str> = initial.iter().map(String::as_str).collect();
    serve(&server, rss("Example", &refs)).await;

    let (engine, mut rx) = engine_with(Arc::new(MemoryStateStore::new()));
    let outcome = engine
        .add("chan:1", &format!("{}/feed", server.uri()), None)
        .await
        .unwrap();

    assert!(!outcome.reused);
    assert_eq!(outcome.title.as_deref(), Some("Example"));

    // Baseline records the 20 most recent ids, nothing is delivered.
    let checkpoint = engine
        .store()
        .cycle_view(outcome.id)
        .unwrap()
        .checkpoint;
    assert_eq!(checkpoint.len(), 20);
    assert!(checkpoint.contains("item1"));
    assert!(checkpoint.contains("item20"));
    assert!(!checkpoint.contains("item21"));
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_cycle_delivers_only_new_items() {
    let server = MockServer::start().await;
    let initial = ids("item", 1..26);
    let refs: Vec<&str> = initial.iter().map(String::as_str).collect();
    serve_once(&server, rss("Example", &refs)).await;

    // One new item on top of the same 25.
    let mut updated = vec!["item0".to_string()];
    updated.extend(initial);
    let refs: Vec<&str> = updated.iter().map(String::as_str).collect();
    serve(&server, rss("Example", &refs)).await;

    let (engine, mut rx) = engine_with(Arc::new(MemoryStateStore::new()));
    let outcome = engine
        .add("chan:1", &format!("{}/feed", server.uri()), None)
        .await
        .unwrap();

    let cycle = engine.run_cycle(outcome.id).await.unwrap();
    assert_eq!(cycle.delivered, 1);
    assert_eq!(cycle.channels, 1);

    let batch = rx.try_recv().unwrap();
    assert_eq!(batch.channel, "chan:1");
    assert_eq!(batch.items.len(), 1);
    assert_eq!(batch.items[0].id, "item0");

    // Checkpoint grew by exactly the delivered item.
    let checkpoint = engine
        .store()
        .cycle_view(outcome.id)
        .unwrap()
        .checkpoint;
    assert_eq!(checkpoint.len(), 21);
    assert!(checkpoint.contains("item0"));
}

#[tokio::test]
async fn test_unchanged_feed_delivers_nothing() {
    let server = MockServer::start().await;
    serve(&server, rss("Example", &["a", "b", "c"])).await;

    let (engine, mut rx) = engine_with(Arc::new(MemoryStateStore::new()));
    let outcome = engine
        .add("chan:1", &format!("{}/feed", server.uri()), None)
        .await
        .unwrap();

    let cycle = engine.run_cycle(outcome.id).await.unwrap();
    assert_eq!(cycle.delivered, 0);
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_checkpoint_survives_restart() {
    let server = MockServer::start().await;
    serve(&server, rss("Example", &["a", "b", "c"])).await;
    let persist = Arc::new(MemoryStateStore::new());
    let url = format!("{}/feed", server.uri());

    {
        let (engine, _rx) = engine_with(Arc::clone(&persist));
        engine.add("chan:1", &url, None).await.unwrap();
    }

    // Fresh process over the same persisted state: the seeded baseline is
    // still in effect, nothing is re-delivered.
    let (engine, mut rx) = engine_with(persist);
    let rows = engine.list("chan:1");
    assert_eq!(rows.len(), 1);

    let cycle = engine.run_cycle(rows[0].id).await.unwrap();
    assert_eq!(cycle.delivered, 0);
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_shared_subscription_fetches_once_and_fans_out() {
    let server = MockServer::start().await;
    serve_once(&server, rss("Example", &["b", "c"])).await;

    let (engine, mut rx) = engine_with(Arc::new(MemoryStateStore::new()));
    let url = format!("{}/feed", server.uri());

    let first = engine.add("chan:1", &url, None).await.unwrap();
    // Second channel joins the existing subscription without a fetch; the
    // seeding response above only matches once, so a second fetch would
    // fail the add.
    let second = engine.add("chan:2", &url, None).await.unwrap();
    assert!(second.reused);
    assert_eq!(second.id, first.id);

    serve(&server, rss("Example", &["a", "b", "c"])).await;
    let cycle = engine.run_cycle(first.id).await.unwrap();
    assert_eq!(cycle.delivered, 1);
    assert_eq!(cycle.channels, 2);

    let mut channels: Vec<String> = Vec::new();
    for _ in 0..2 {
        let batch = rx.try_recv().unwrap();
        assert_eq!(batch.items.len(), 1);
        assert_eq!(batch.items[0].id, "a");
        channels.push(batch.channel);
    }
    channels.sort();
    assert_eq!(channels, vec!["chan:1", "chan:2"]);
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_concurrent_cycles_deliver_once() {
    let server = MockServer::start().await;
    serve_once(&server, rss("Example", &["b", "c"])).await;
    serve(&server, rss("Example", &["a", "b", "c"])).await;

    let (engine, mut rx) = engine_with(Arc::new(MemoryStateStore::new()));
    let outcome = engine
        .add("chan:1", &format!("{}/feed", server.uri()), None)
        .await
        .unwrap();

    // Both cycles see the same updated feed; serialization through the
    // per-subscription slot means the second observes the first's
    // committed checkpoint.
    let (r1, r2) = tokio::join!(engine.run_cycle(outcome.id), engine.run_cycle(outcome.id));
    let total = r1.unwrap().delivered + r2.unwrap().delivered;
    assert_eq!(total, 1);

    assert_eq!(rx.try_recv().unwrap().items.len(), 1);
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_failed_cycle_leaves_checkpoint_untouched() {
    let server = MockServer::start().await;
    serve_once(&server, rss("Example", &["b", "c"])).await;
    Mock::given(method("GET"))
        .and(path("/feed"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    serve(&server, rss("Example", &["a", "b", "c"])).await;

    let (engine, mut rx) = engine_with(Arc::new(MemoryStateStore::new()));
    let outcome = engine
        .add("chan:1", &format!("{}/feed", server.uri()), None)
        .await
        .unwrap();

    // The failed cycle neither delivers nor commits.
    assert!(engine.run_cycle(outcome.id).await.is_err());
    assert!(rx.try_recv().is_err());
    assert_eq!(engine.store().cycle_view(outcome.id).unwrap().checkpoint.len(), 2);

    // The next cycle picks the new item up as usual.
    let cycle = engine.run_cycle(outcome.id).await.unwrap();
    assert_eq!(cycle.delivered, 1);
    assert_eq!(rx.try_recv().unwrap().items[0].id, "a");
}

#[tokio::test]
async fn test_cycle_for_removed_subscription_is_gone() {
    let server = MockServer::start().await;
    serve(&server, rss("Example", &["a"])).await;

    let (engine, _rx) = engine_with(Arc::new(MemoryStateStore::new()));
    let outcome = engine
        .add("chan:1", &format!("{}/feed", server.uri()), None)
        .await
        .unwrap();

    engine.remove("chan:1", 0).unwrap();
    assert!(engine.run_cycle(outcome.id).await.is_err());
}
