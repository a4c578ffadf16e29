//! Command-surface tests: validation, atomic subscribe, listing,
//! removal, schedule changes, and on-demand reads.

use std::sync::Arc;

use tokio::sync::mpsc;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use feedrelay::config::Config;
use feedrelay::dispatch::{DeliveryBatch, Dispatcher};
use feedrelay::engine::{CommandError, Engine, GetTarget, SubscribeError};
use feedrelay::store::{MemoryStateStore, SubscriptionStore};

fn rss(title: &str, ids: &[&str]) -> String {
    let items: String = ids
        .iter()
        .map(|id| {
            format!(
                "<item><guid>{id}</guid><title>Post {id}</title>\
                 <link>https://example.com/{id}</link>\
                 <description>About {id}</description></item>"
            )
        })
        .collect();
    format!(
        "<?xml version=\"1.0\"?><rss version=\"2.0\"><channel>\
         <title>{title}</title>{items}</channel></rss>"
    )
}

fn engine() -> (Arc<Engine>, mpsc::Receiver<DeliveryBatch>) {
    let store = Arc::new(
        SubscriptionStore::open(Box::new(MemoryStateStore::new())).unwrap(),
    );
    let (dispatcher, rx) = Dispatcher::channel(16);
    let config = Config {
        fetch_timeout_secs: 5,
        ..Config::default()
    };
    (Engine::new(config, store, dispatcher).unwrap(), rx)
}

async fn serve_feed(server: &MockServer, route: &str, body: String) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_add_rejects_invalid_url() {
    let (engine, _rx) = engine();
    let err = engine.add("chan:1", "not a url at all", None).await;
    assert!(matches!(err, Err(SubscribeError::InvalidUrl)));

    let err = engine.add("chan:1", "ftp://example.com/feed", None).await;
    assert!(matches!(err, Err(SubscribeError::InvalidUrl)));
}

#[tokio::test]
async fn test_add_rejects_invalid_cron_before_fetching() {
    // No mock server at all: cron validation must fail first.
    let (engine, _rx) = engine();
    let err = engine
        .add("chan:1", "https://example.com/feed", Some("every fortnight"))
        .await;
    assert!(matches!(err, Err(SubscribeError::InvalidCron(_))));
}

#[tokio::test]
async fn test_failed_fetch_leaves_no_subscription() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let (engine, _rx) = engine();
    let err = engine
        .add("chan:1", &format!("{}/feed", server.uri()), None)
        .await;
    assert!(matches!(err, Err(SubscribeError::FetchFailed(_))));
    assert!(engine.list("chan:1").is_empty());
}

#[tokio::test]
async fn test_unparsable_document_leaves_no_subscription() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html><body>nope</body></html>"))
        .mount(&server)
        .await;

    let (engine, _rx) = engine();
    let err = engine
        .add("chan:1", &format!("{}/feed", server.uri()), None)
        .await;
    assert!(matches!(err, Err(SubscribeError::ParseFailed(_))));
    assert!(engine.list("chan:1").is_empty());
}

#[tokio::test]
async fn test_duplicate_add_rejected() {
    let server = MockServer::start().await;
    serve_feed(&server, "/feed", rss("Example", &["a"])).await;

    let (engine, _rx) = engine();
    let url = format!("{}/feed", server.uri());
    engine.add("chan:1", &url, None).await.unwrap();

    let err = engine.add("chan:1", &url, None).await;
    assert!(matches!(err, Err(SubscribeError::AlreadySubscribed)));
    assert_eq!(engine.list("chan:1").len(), 1);
}

#[tokio::test]
async fn test_url_normalization_dedupes_spellings() {
    let server = MockServer::start().await;
    serve_feed(&server, "/feed", rss("Example", &["a"])).await;

    let (engine, _rx) = engine();
    let url = format!("{}/feed", server.uri());
    engine.add("chan:1", &url, None).await.unwrap();

    // Padding and scheme casing normalize to the same store key.
    let padded = format!("  {url}  ");
    let err = engine.add("chan:1", &padded, None).await;
    assert!(matches!(err, Err(SubscribeError::AlreadySubscribed)));

    let shouty = url.replacen("http://", "HTTP://", 1);
    let err = engine.add("chan:1", &shouty, None).await;
    assert!(matches!(err, Err(SubscribeError::AlreadySubscribed)));
}

#[tokio::test]
async fn test_list_remove_and_index_shift() {
    let server = MockServer::start().await;
    serve_feed(&server, "/one", rss("One", &["a"])).await;
    serve_feed(&server, "/two", rss("Two", &["b"])).await;

    let (engine, _rx) = engine();
    engine
        .add("chan:1", &format!("{}/one", server.uri()), None)
        .await
        .unwrap();
    engine
        .add("chan:1", &format!("{}/two", server.uri()), None)
        .await
        .unwrap();

    let rows = engine.list("chan:1");
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].title.as_deref(), Some("One"));
    assert_eq!(rows[1].title.as_deref(), Some("Two"));

    engine.remove("chan:1", 0).unwrap();
    let rows = engine.list("chan:1");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].index, 0);
    assert_eq!(rows[0].title.as_deref(), Some("Two"));

    assert!(matches!(
        engine.remove("chan:1", 5),
        Err(CommandError::NotFound)
    ));
}

#[tokio::test]
async fn test_change_cron_and_reset_to_default() {
    let server = MockServer::start().await;
    serve_feed(&server, "/feed", rss("Example", &["a"])).await;

    let (engine, _rx) = engine();
    engine
        .add("chan:1", &format!("{}/feed", server.uri()), None)
        .await
        .unwrap();

    let expr = engine.change("chan:1", 0, Some("*/5 * * * *")).unwrap();
    assert_eq!(expr, "*/5 * * * *");
    assert_eq!(engine.list("chan:1")[0].cron_expr, "*/5 * * * *");

    // Omitting the expression resets to the configured default.
    let expr = engine.change("chan:1", 0, None).unwrap();
    assert_eq!(expr, engine.config().default_cron_exp);

    assert!(matches!(
        engine.change("chan:1", 0, Some("nope")),
        Err(CommandError::InvalidCron(_))
    ));
    assert!(matches!(
        engine.change("chan:1", 9, Some("*/5 * * * *")),
        Err(CommandError::NotFound)
    ));
}

#[tokio::test]
async fn test_get_returns_items_without_touching_checkpoint() {
    let server = MockServer::start().await;
    serve_feed(&server, "/feed", rss("Example", &["b", "c"])).await;

    let (engine, mut rx) = engine();
    let outcome = engine
        .add("chan:1", &format!("{}/feed", server.uri()), None)
        .await
        .unwrap();

    // New item appears, then the user asks for the latest.
    server.reset().await;
    serve_feed(&server, "/feed", rss("Example", &["a", "b", "c"])).await;

    let results = engine
        .get("chan:1", GetTarget::Index(0), 2)
        .await
        .unwrap();
    assert_eq!(results.len(), 1);
    let items = results[0].items.as_ref().unwrap();
    assert_eq!(items.len(), 2);
    assert_eq!(items[0].id, "a");

    // A read, not a delivery: nothing dispatched, checkpoint unchanged,
    // and the next cycle still treats "a" as new.
    assert!(rx.try_recv().is_err());
    let checkpoint = engine
        .store()
        .cycle_view(outcome.id)
        .unwrap()
        .checkpoint;
    assert_eq!(checkpoint.len(), 2);
    assert!(!checkpoint.contains("a"));

    let cycle = engine.run_cycle(outcome.id).await.unwrap();
    assert_eq!(cycle.delivered, 1);
}

#[tokio::test]
async fn test_get_all_reports_partial_failure() {
    let server = MockServer::start().await;
    serve_feed(&server, "/ok", rss("Healthy", &["a", "b"])).await;
    serve_feed(&server, "/broken", rss("Doomed", &["c"])).await;

    let (engine, _rx) = engine();
    engine
        .add("chan:1", &format!("{}/ok", server.uri()), None)
        .await
        .unwrap();
    engine
        .add("chan:1", &format!("{}/broken", server.uri()), None)
        .await
        .unwrap();

    server.reset().await;
    serve_feed(&server, "/ok", rss("Healthy", &["a", "b"])).await;
    Mock::given(method("GET"))
        .and(path("/broken"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let results = engine.get("chan:1", GetTarget::All, 10).await.unwrap();
    assert_eq!(results.len(), 2);
    assert!(results[0].items.is_ok());
    assert!(results[1].items.is_err());

    assert!(matches!(
        engine.get("chan:1", GetTarget::Index(7), 10).await,
        Err(CommandError::NotFound)
    ));
}

#[tokio::test]
async fn test_get_refreshes_cached_title() {
    let server = MockServer::start().await;
    serve_feed(&server, "/feed", rss("Old Name", &["a"])).await;

    let (engine, _rx) = engine();
    engine
        .add("chan:1", &format!("{}/feed", server.uri()), None)
        .await
        .unwrap();
    assert_eq!(engine.list("chan:1")[0].title.as_deref(), Some("Old Name"));

    server.reset().await;
    serve_feed(&server, "/feed", rss("New Name", &["a"])).await;

    engine.get("chan:1", GetTarget::All, 5).await.unwrap();
    assert_eq!(engine.list("chan:1")[0].title.as_deref(), Some("New Name"));
}
