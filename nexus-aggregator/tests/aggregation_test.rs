use async_trait::async_trait;
use chrono::Utc;
use mockito::{Server, ServerGuard};
use nexus_aggregator::store;
use nexus_aggregator::{
    Aggregator, AggregatorError, CandidatePost, Database, FetchConfig, FetchOutcome, HackerNewsProvider, HttpFetcher,
    PostFilter, Provider, ProviderKind, ProviderRegistry, RssFeedProvider,
};
use sqlx::sqlite::SqliteConnection;
use sqlx::Connection;
use std::sync::{Arc, Once};
use std::time::Duration;
use tracing::info;

static INIT: Once = Once::new();

fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .try_init()
            .ok();
    });
}

fn fetcher() -> HttpFetcher {
    HttpFetcher::new(FetchConfig {
        user_agent: "Nexus-Aggregator-Test/1.0".to_string(),
        timeout_seconds: 5,
        max_retries: 0,
        ..FetchConfig::default()
    })
    .unwrap()
}

fn rss(items: &[(&str, &str)]) -> String {
    let items: String = items
        .iter()
        .map(|(title, link)| {
            format!(
                "<item><title>{}</title><link>{}</link><pubDate>Mon, 01 Jan 2024 12:00:00 GMT</pubDate></item>",
                title, link
            )
        })
        .collect();
    format!(
        r#"<?xml version="1.0"?><rss version="2.0"><channel><title>Test</title><link>https://example.com</link><description>d</description>{}</channel></rss>"#,
        items
    )
}

async fn serve_feed(server: &mut ServerGuard, path: &str, body: String) {
    server
        .mock("GET", path)
        .with_header("content-type", "application/rss+xml")
        .with_body(body)
        .create_async()
        .await;
}

async fn database() -> Database {
    let db = Database::in_memory().await.unwrap();
    db.setup_schema().await.unwrap();
    db
}

const URL_A: &str = "https://example.com/a";
const URL_B: &str = "https://example.com/b";
const URL_C: &str = "https://example.com/c";

#[tokio::test]
async fn aggregate_all_persists_merged_batch_grouped_by_source() {
    init_tracing();

    let mut server = Server::new_async().await;
    serve_feed(&mut server, "/alpha.xml", rss(&[("A", URL_A), ("B from alpha", URL_B)])).await;
    serve_feed(&mut server, "/beta.xml", rss(&[("B from beta", URL_B), ("C", URL_C)])).await;

    let mut registry = ProviderRegistry::new();
    registry.add_provider(Arc::new(
        RssFeedProvider::new(&format!("{}/alpha.xml", server.url()), Some("alpha"), fetcher()).unwrap(),
    ));
    registry.add_provider(Arc::new(
        RssFeedProvider::new(&format!("{}/beta.xml", server.url()), Some("beta"), fetcher()).unwrap(),
    ));
    let aggregator = Aggregator::new(Arc::new(registry));
    let db = database().await;

    let mut tx = db.begin().await.unwrap();
    let grouped = aggregator.aggregate_all(&mut tx, 10).await.unwrap();
    tx.commit().await.unwrap();

    info!("Aggregated sources: {:?}", grouped.keys().collect::<Vec<_>>());

    let alpha: Vec<&str> = grouped["alpha"].iter().map(|p| p.url.as_str()).collect();
    let beta: Vec<&str> = grouped["beta"].iter().map(|p| p.url.as_str()).collect();
    assert_eq!(alpha, vec![URL_A, URL_B]);
    assert_eq!(beta, vec![URL_C]);
    assert_eq!(grouped["alpha"][1].title, "B from alpha");

    let mut conn = db.pool().acquire().await.unwrap();
    let page = store::list_posts(&mut conn, 1, 50, &PostFilter::default()).await.unwrap();
    assert_eq!(page.total, 3);
    drop(conn);

    // A second run converges on the same rows.
    let mut tx = db.begin().await.unwrap();
    let again = aggregator.aggregate_all(&mut tx, 10).await.unwrap();
    tx.commit().await.unwrap();
    assert_eq!(again, grouped);
}

#[tokio::test]
async fn failing_provider_does_not_block_the_others() {
    init_tracing();

    let mut server = Server::new_async().await;
    server.mock("GET", "/broken.xml").with_status(500).create_async().await;
    serve_feed(&mut server, "/good.xml", rss(&[("Good", URL_A)])).await;
    server.mock("GET", "/hn/topstories.json").with_body("[7, 8]").create_async().await;
    server
        .mock("GET", "/hn/item/7.json")
        .with_body(r#"{"id": 7, "title": "Show HN: a thing", "time": 1704110400}"#)
        .create_async()
        .await;
    server
        .mock("GET", "/hn/item/8.json")
        .with_body(r#"{"id": 8, "title": 42, "time": "yesterday"}"#)
        .create_async()
        .await;

    let hn = HackerNewsProvider::new(fetcher())
        .with_api_url(&format!("{}/hn", server.url()))
        .with_item_page_url("https://news.ycombinator.com/item?id=");

    let providers: Vec<Arc<dyn Provider>> = vec![
        Arc::new(RssFeedProvider::new(&format!("{}/broken.xml", server.url()), Some("broken"), fetcher()).unwrap()),
        Arc::new(hn),
        Arc::new(RssFeedProvider::new(&format!("{}/good.xml", server.url()), Some("good"), fetcher()).unwrap()),
    ];
    let aggregator = Aggregator::new(Arc::new(ProviderRegistry::with_providers(providers)));
    let db = database().await;

    let mut tx = db.begin().await.unwrap();
    let grouped = aggregator.aggregate_all(&mut tx, 10).await.unwrap();
    tx.commit().await.unwrap();

    assert!(!grouped.contains_key("broken"));
    assert_eq!(grouped["good"].len(), 1);
    assert_eq!(grouped["hackernews"].len(), 1);
    assert_eq!(grouped["hackernews"][0].url, "https://news.ycombinator.com/item?id=7");
}

#[tokio::test]
async fn aggregate_from_source_only_touches_that_provider() {
    init_tracing();

    let mut server = Server::new_async().await;
    serve_feed(&mut server, "/alpha.xml", rss(&[("A", URL_A), ("B", URL_B)])).await;
    let beta_mock = server.mock("GET", "/beta.xml").expect(0).create_async().await;

    let providers: Vec<Arc<dyn Provider>> = vec![
        Arc::new(RssFeedProvider::new(&format!("{}/alpha.xml", server.url()), Some("alpha"), fetcher()).unwrap()),
        Arc::new(RssFeedProvider::new(&format!("{}/beta.xml", server.url()), Some("beta"), fetcher()).unwrap()),
    ];
    let aggregator = Aggregator::new(Arc::new(ProviderRegistry::with_providers(providers)));
    let db = database().await;

    let mut tx = db.begin().await.unwrap();
    let posts = aggregator.aggregate_from_source(&mut tx, "alpha", 1).await.unwrap();
    tx.commit().await.unwrap();

    assert_eq!(posts.len(), 1);
    assert_eq!(posts[0].url, URL_A);
    beta_mock.assert_async().await;

    let mut conn = db.pool().acquire().await.unwrap();
    let missing = aggregator.aggregate_from_source(&mut conn, "nowhere", 5).await.unwrap();
    assert!(missing.is_empty());
}

struct SlowProvider {
    delay: Duration,
    posts: Vec<CandidatePost>,
}

#[async_trait]
impl Provider for SlowProvider {
    fn source_name(&self) -> &str {
        "slow"
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::RankedApi
    }

    fn endpoint(&self) -> &str {
        "https://slow.example"
    }

    async fn fetch(&self, limit: usize) -> FetchOutcome {
        tokio::time::sleep(self.delay).await;
        FetchOutcome::Fetched(self.posts.iter().take(limit).cloned().collect())
    }

    async fn is_available(&self) -> bool {
        true
    }
}

#[tokio::test]
async fn concurrent_trigger_is_rejected() {
    init_tracing();

    let provider = SlowProvider {
        delay: Duration::from_millis(300),
        posts: Vec::new(),
    };
    let aggregator = Aggregator::new(Arc::new(ProviderRegistry::with_providers(vec![Arc::new(provider) as Arc<dyn Provider>])));

    let mut first_conn = SqliteConnection::connect("sqlite::memory:").await.unwrap();
    let mut second_conn = SqliteConnection::connect("sqlite::memory:").await.unwrap();

    let first = aggregator.aggregate_all(&mut first_conn, 5);
    let second = async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(aggregator.is_running());
        aggregator.aggregate_all(&mut second_conn, 5).await
    };
    let (first, second) = tokio::join!(first, second);

    assert!(first.unwrap().is_empty());
    assert!(matches!(second, Err(AggregatorError::RunInProgress)));
    assert!(!aggregator.is_running());
}

#[tokio::test]
async fn storage_failure_is_propagated() {
    init_tracing();

    let provider = SlowProvider {
        delay: Duration::from_millis(0),
        posts: vec![CandidatePost::new("Post", URL_A, "slow", Utc::now()).unwrap()],
    };
    let aggregator = Aggregator::new(Arc::new(ProviderRegistry::with_providers(vec![Arc::new(provider) as Arc<dyn Provider>])));

    // No schema on this connection.
    let mut conn = SqliteConnection::connect("sqlite::memory:").await.unwrap();
    let result = aggregator.aggregate_all(&mut conn, 5).await;
    assert!(matches!(result, Err(AggregatorError::Database(_))));
    assert!(!aggregator.is_running());
}

#[tokio::test]
async fn provider_stats_reports_every_provider() {
    init_tracing();

    let mut server = Server::new_async().await;
    server.mock("HEAD", "/up.xml").with_status(200).create_async().await;
    server.mock("HEAD", "/down.xml").with_status(404).create_async().await;
    server.mock("GET", "/down.xml").with_status(404).create_async().await;

    let up_url = format!("{}/up.xml", server.url());
    let providers: Vec<Arc<dyn Provider>> = vec![
        Arc::new(RssFeedProvider::new(&up_url, Some("up"), fetcher()).unwrap()),
        Arc::new(RssFeedProvider::new(&format!("{}/down.xml", server.url()), Some("down"), fetcher()).unwrap()),
    ];
    let aggregator = Aggregator::new(Arc::new(ProviderRegistry::with_providers(providers)));

    let stats = aggregator.provider_stats().await;
    assert_eq!(stats.len(), 2);
    assert!(stats["up"].available);
    assert_eq!(stats["up"].endpoint, up_url);
    assert_eq!(stats["up"].kind, ProviderKind::SyndicatedFeed);
    assert!(!stats["down"].available);
}
