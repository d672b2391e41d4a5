//! End-to-end tests for the feeds HTTP surface: post ingestion, live SSE
//! notifications, feed pages, and degradation when sibling services fail.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use futures_util::{Stream, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpListener;

use yatc_feeds::broadcast::{BroadcastSettings, Broadcaster};
use yatc_feeds::config::UpstreamConfig;
use yatc_feeds::feed::models::{FeedResponse, PostSummary, User};
use yatc_feeds::upstream::UpstreamClients;

type PostTable = Arc<Mutex<HashMap<i64, PostSummary>>>;

/// Social graph served by the stub connections service:
/// bob follows alice, carol follows nobody.
fn followers_of(user: &str) -> Vec<&'static str> {
    match user {
        "alice" => vec!["bob"],
        _ => vec![],
    }
}

fn followings_of(user: &str) -> Vec<&'static str> {
    match user {
        "bob" => vec!["alice"],
        _ => vec![],
    }
}

async fn stub_followers(Path(user): Path<String>) -> Json<Value> {
    Json(json!({ "followers": followers_of(&user) }))
}

async fn stub_followings(Path(user): Path<String>) -> Json<Value> {
    Json(json!({ "followings": followings_of(&user) }))
}

async fn stub_post(
    State(posts): State<PostTable>,
    Path(id): Path<i64>,
) -> Result<Json<PostSummary>, StatusCode> {
    let posts = posts.lock().unwrap();
    posts.get(&id).cloned().map(Json).ok_or(StatusCode::NOT_FOUND)
}

async fn stub_user(Path(id): Path<String>) -> Result<Json<User>, StatusCode> {
    if id == "ghost" {
        return Err(StatusCode::NOT_FOUND);
    }
    Ok(Json(User {
        name: Some(format!("{} (display)", id)),
        avatar: None,
        id,
    }))
}

/// Start stub connections/posts/users services on one random port.
async fn start_stub_upstream() -> (String, PostTable) {
    let posts: PostTable = Arc::new(Mutex::new(HashMap::new()));
    let app = Router::new()
        .route("/api/v1/connections/{user}", get(stub_followers))
        .route("/api/v1/connections/{user}/followings", get(stub_followings))
        .route("/api/v1/posts/{id}", get(stub_post))
        .route("/api/v1/users/{id}", get(stub_user))
        .with_state(posts.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{}", addr), posts)
}

struct TestServer {
    base_url: String,
    broadcaster: Broadcaster,
}

/// Helper: start the feeds service on a random port against `upstream_url`.
async fn start_test_server(upstream_url: &str) -> TestServer {
    let tmp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let data_dir = tmp_dir.path().to_str().unwrap().to_string();

    let db = yatc_feeds::db::init_db(&data_dir).expect("Failed to init DB");
    let upstream = UpstreamClients::new(&UpstreamConfig {
        connections_url: upstream_url.to_string(),
        posts_url: upstream_url.to_string(),
        users_url: upstream_url.to_string(),
        request_timeout_secs: 2,
    })
    .expect("Failed to build upstream clients");
    let broadcaster = Broadcaster::new(BroadcastSettings {
        keep_alive: Duration::from_secs(60),
        delivery_timeout: Duration::from_millis(500),
        channel_capacity: 16,
    });

    let (post_tx, post_rx) = yatc_feeds::feed::ingest::new_post_queue();
    yatc_feeds::feed::ingest::spawn_post_listener(
        db.clone(),
        upstream.clone(),
        broadcaster.clone(),
        post_rx,
    );

    let state = yatc_feeds::state::AppState {
        db,
        broadcaster: broadcaster.clone(),
        upstream,
        post_tx,
        sse_ping_interval: Duration::from_millis(100),
    };

    let app = yatc_feeds::routes::build_router(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
        let _keep = tmp_dir;
    });

    TestServer {
        base_url: format!("http://{}", addr),
        broadcaster,
    }
}

/// Minimal SSE frame reader over a reqwest byte stream.
struct SseReader<S> {
    stream: Pin<Box<S>>,
    buf: String,
}

impl<S, B> SseReader<S>
where
    S: Stream<Item = reqwest::Result<B>>,
    B: AsRef<[u8]>,
{
    fn new(stream: S) -> Self {
        Self {
            stream: Box::pin(stream),
            buf: String::new(),
        }
    }

    /// Next event carrying both `id` and `data`; comment frames are skipped.
    async fn next_event(&mut self, wait: Duration) -> Option<(String, Value)> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            while let Some(pos) = self.buf.find("\n\n") {
                let frame: String = self.buf.drain(..pos + 2).collect();
                let mut id = None;
                let mut data = None;
                for line in frame.lines() {
                    if let Some(v) = line.strip_prefix("id:") {
                        id = Some(v.trim().to_string());
                    } else if let Some(v) = line.strip_prefix("data:") {
                        data = Some(v.trim().to_string());
                    }
                }
                if let (Some(id), Some(data)) = (id, data) {
                    let data = serde_json::from_str(&data).expect("SSE data should be JSON");
                    return Some((id, data));
                }
            }

            match tokio::time::timeout_at(deadline, self.stream.next()).await {
                Ok(Some(Ok(chunk))) => self.buf.push_str(&String::from_utf8_lossy(chunk.as_ref())),
                _ => return None,
            }
        }
    }
}

async fn open_live_feed(
    base_url: &str,
    user: &str,
) -> SseReader<impl Stream<Item = reqwest::Result<impl AsRef<[u8]>>>> {
    let resp = reqwest::get(format!("{}/api/v1/feeds/{}/sse", base_url, user))
        .await
        .expect("Failed to open live feed");
    assert_eq!(resp.status(), 200);
    let content_type = resp
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    assert!(content_type.starts_with("text/event-stream"), "got {}", content_type);
    SseReader::new(resp.bytes_stream())
}

async fn send_post(base_url: &str, posts: Option<&PostTable>, id: i64, author: &str, minute: u32) {
    let created = format!("2019-05-01T12:{:02}:00Z", minute);
    let body = json!({
        "id": id,
        "author": author,
        "created": created,
        "content": format!("post {}", id),
    });
    if let Some(posts) = posts {
        let summary: PostSummary = serde_json::from_value(body.clone()).unwrap();
        posts.lock().unwrap().insert(id, summary);
    }

    let resp = reqwest::Client::new()
        .post(format!("{}/api/v1/feeds", base_url))
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 202, "Ingestion should be accepted");
}

async fn get_feed(base_url: &str, user: &str, page: i64) -> FeedResponse {
    let resp = reqwest::get(format!("{}/api/v1/feeds/{}?page={}", base_url, user, page))
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    resp.json().await.unwrap()
}

/// Poll the feed until it holds `expected` posts (ingestion is asynchronous).
async fn wait_for_feed(base_url: &str, user: &str, expected: usize) -> FeedResponse {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let feed = get_feed(base_url, user, 0).await;
        if feed.posts.len() >= expected || tokio::time::Instant::now() > deadline {
            return feed;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

async fn wait_for_channels(broadcaster: &Broadcaster, user: &str, expected: usize) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while broadcaster.channel_count(user) != expected {
        assert!(
            tokio::time::Instant::now() < deadline,
            "{} should have {} channels, has {}",
            user,
            expected,
            broadcaster.channel_count(user)
        );
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

#[tokio::test]
async fn test_health_check() {
    let (upstream_url, _posts) = start_stub_upstream().await;
    let server = start_test_server(&upstream_url).await;

    let resp = reqwest::get(format!("{}/health", server.base_url)).await.unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.text().await.unwrap(), "ok");
}

#[tokio::test]
async fn test_new_post_reaches_author_and_followers_live() {
    let (upstream_url, posts) = start_stub_upstream().await;
    let server = start_test_server(&upstream_url).await;

    let mut alice = open_live_feed(&server.base_url, "alice").await;
    let mut bob = open_live_feed(&server.base_url, "bob").await;
    let mut carol = open_live_feed(&server.base_url, "carol").await;

    send_post(&server.base_url, Some(&posts), 42, "alice", 0).await;

    let (id, data) = alice
        .next_event(Duration::from_secs(5))
        .await
        .expect("Author should be notified");
    assert_eq!(id, "42");
    assert_eq!(data, json!({ "id": 42 }));

    let (id, data) = bob
        .next_event(Duration::from_secs(5))
        .await
        .expect("Follower should be notified");
    assert_eq!(id, "42");
    assert_eq!(data, json!({ "id": 42 }));

    assert!(
        carol.next_event(Duration::from_millis(300)).await.is_none(),
        "Non-follower should not be notified"
    );
}

#[tokio::test]
async fn test_multiple_tabs_for_same_user_all_receive() {
    let (upstream_url, posts) = start_stub_upstream().await;
    let server = start_test_server(&upstream_url).await;

    let mut tab1 = open_live_feed(&server.base_url, "bob").await;
    let mut tab2 = open_live_feed(&server.base_url, "bob").await;
    assert_eq!(server.broadcaster.channel_count("bob"), 2);

    send_post(&server.base_url, Some(&posts), 7, "alice", 0).await;

    assert_eq!(tab1.next_event(Duration::from_secs(5)).await.map(|e| e.0), Some("7".to_string()));
    assert_eq!(tab2.next_event(Duration::from_secs(5)).await.map(|e| e.0), Some("7".to_string()));
}

#[tokio::test]
async fn test_closed_live_feed_is_unregistered() {
    let (upstream_url, _posts) = start_stub_upstream().await;
    let server = start_test_server(&upstream_url).await;

    let dave = open_live_feed(&server.base_url, "dave").await;
    assert_eq!(server.broadcaster.channel_count("dave"), 1);

    drop(dave);
    wait_for_channels(&server.broadcaster, "dave", 0).await;
    assert_eq!(server.broadcaster.key_count(), 0);
}

#[tokio::test]
async fn test_feed_page_includes_own_and_followed_posts() {
    let (upstream_url, posts) = start_stub_upstream().await;
    let server = start_test_server(&upstream_url).await;

    send_post(&server.base_url, Some(&posts), 1, "alice", 1).await;
    send_post(&server.base_url, Some(&posts), 2, "bob", 2).await;
    send_post(&server.base_url, Some(&posts), 3, "carol", 3).await;
    send_post(&server.base_url, Some(&posts), 4, "alice", 4).await;

    let feed = wait_for_feed(&server.base_url, "bob", 3).await;
    let ids: Vec<i64> = feed.posts.iter().map(|p| p.id).collect();
    assert_eq!(ids, vec![4, 2, 1], "bob sees alice's and his own posts, newest first");

    let newest = &feed.posts[0];
    assert_eq!(newest.author.id, "alice");
    assert_eq!(newest.author.name.as_deref(), Some("alice (display)"));
    assert_eq!(newest.content, "post 4");

    // carol follows nobody: only her own post
    let feed = wait_for_feed(&server.base_url, "carol", 1).await;
    let ids: Vec<i64> = feed.posts.iter().map(|p| p.id).collect();
    assert_eq!(ids, vec![3]);
}

#[tokio::test]
async fn test_feed_pages_hold_ten_posts() {
    let (upstream_url, posts) = start_stub_upstream().await;
    let server = start_test_server(&upstream_url).await;

    for i in 0..12 {
        send_post(&server.base_url, Some(&posts), 100 + i, "alice", i as u32).await;
    }
    let first = wait_for_feed(&server.base_url, "alice", 10).await;
    assert_eq!(first.posts.len(), 10);
    assert_eq!(first.posts[0].id, 111);

    // Ingestion is sequential, so once page 0 is full the rest lands shortly.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    let second = loop {
        let page = get_feed(&server.base_url, "alice", 1).await;
        if page.posts.len() >= 2 || tokio::time::Instant::now() > deadline {
            break page;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    };
    let ids: Vec<i64> = second.posts.iter().map(|p| p.id).collect();
    assert_eq!(ids, vec![101, 100]);

    // Negative pages read as the first page
    let negative = get_feed(&server.base_url, "alice", -3).await;
    assert_eq!(negative.posts.len(), 10);
}

#[tokio::test]
async fn test_feed_skips_posts_that_cannot_be_hydrated() {
    let (upstream_url, posts) = start_stub_upstream().await;
    let server = start_test_server(&upstream_url).await;

    let mut live = open_live_feed(&server.base_url, "alice").await;

    // Known to the posts service
    send_post(&server.base_url, Some(&posts), 1, "alice", 1).await;
    // Unknown to the posts service
    send_post(&server.base_url, None, 2, "alice", 2).await;

    // Both events are still broadcast; wait for ingestion of the second one.
    assert_eq!(live.next_event(Duration::from_secs(5)).await.map(|e| e.0), Some("1".to_string()));
    assert_eq!(live.next_event(Duration::from_secs(5)).await.map(|e| e.0), Some("2".to_string()));

    let feed = get_feed(&server.base_url, "alice", 0).await;
    let ids: Vec<i64> = feed.posts.iter().map(|p| p.id).collect();
    assert_eq!(ids, vec![1]);
}

#[tokio::test]
async fn test_duplicate_post_is_broadcast_again_but_stored_once() {
    let (upstream_url, posts) = start_stub_upstream().await;
    let server = start_test_server(&upstream_url).await;

    let mut live = open_live_feed(&server.base_url, "alice").await;
    send_post(&server.base_url, Some(&posts), 5, "alice", 0).await;
    send_post(&server.base_url, Some(&posts), 5, "alice", 0).await;

    assert_eq!(live.next_event(Duration::from_secs(5)).await.map(|e| e.0), Some("5".to_string()));
    assert_eq!(live.next_event(Duration::from_secs(5)).await.map(|e| e.0), Some("5".to_string()));

    let feed = get_feed(&server.base_url, "alice", 0).await;
    assert_eq!(feed.posts.len(), 1);
}

#[tokio::test]
async fn test_unreachable_upstream_degrades_softly() {
    // Nothing listens on this port once the listener is dropped.
    let dead_url = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        format!("http://{}", listener.local_addr().unwrap())
    };
    let server = start_test_server(&dead_url).await;

    let mut alice = open_live_feed(&server.base_url, "alice").await;
    send_post(&server.base_url, None, 9, "alice", 0).await;

    // Follower lookup failed, but the author is still notified.
    let (id, _) = alice
        .next_event(Duration::from_secs(5))
        .await
        .expect("Author should be notified without the connections service");
    assert_eq!(id, "9");

    // Posts cannot be hydrated, so the page is empty rather than an error.
    let feed = get_feed(&server.base_url, "alice", 0).await;
    assert!(feed.posts.is_empty());
}

#[tokio::test]
async fn test_ingest_rejects_malformed_post() {
    let (upstream_url, _posts) = start_stub_upstream().await;
    let server = start_test_server(&upstream_url).await;

    let resp = reqwest::Client::new()
        .post(format!("{}/api/v1/feeds", server.base_url))
        .json(&json!({ "id": 1 }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 422);
}

#[tokio::test]
async fn test_shutdown_ends_live_feeds() {
    let (upstream_url, _posts) = start_stub_upstream().await;
    let server = start_test_server(&upstream_url).await;

    let resp = reqwest::get(format!("{}/api/v1/feeds/erin/sse", server.base_url))
        .await
        .unwrap();
    assert_eq!(server.broadcaster.channel_count("erin"), 1);

    server.broadcaster.shutdown();

    // The body completes once the channel is closed.
    let body = tokio::time::timeout(Duration::from_secs(5), resp.bytes())
        .await
        .expect("Live feed should end after shutdown");
    assert!(body.is_ok());
    assert_eq!(server.broadcaster.key_count(), 0);
}

#[tokio::test]
async fn test_unchanged_feed_page_answers_not_modified() {
    let (upstream_url, posts) = start_stub_upstream().await;
    let server = start_test_server(&upstream_url).await;

    send_post(&server.base_url, Some(&posts), 1, "alice", 1).await;
    wait_for_feed(&server.base_url, "alice", 1).await;

    let client = reqwest::Client::new();
    let url = format!("{}/api/v1/feeds/alice?page=0", server.base_url);
    let resp = client.get(&url).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    let etag = resp
        .headers()
        .get("etag")
        .expect("Feed page should carry an ETag")
        .to_str()
        .unwrap()
        .to_string();

    let resp = client
        .get(&url)
        .header("if-none-match", &etag)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 304);
    assert_eq!(resp.headers().get("etag").unwrap().to_str().unwrap(), etag);

    // A new post changes the page, so the old tag no longer matches
    send_post(&server.base_url, Some(&posts), 2, "alice", 2).await;
    wait_for_feed(&server.base_url, "alice", 2).await;

    let resp = client
        .get(&url)
        .header("if-none-match", &etag)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_ne!(resp.headers().get("etag").unwrap().to_str().unwrap(), etag);
    let feed: FeedResponse = resp.json().await.unwrap();
    assert_eq!(feed.posts.len(), 2);
}
