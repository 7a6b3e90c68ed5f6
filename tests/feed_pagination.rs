//! Integration tests for feed pagination and single-item lookup against a
//! mock listing API.

use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use std::time::Duration;
use sift::feed::{FeedError, FeedStore, FALLBACK_IMAGE_URL};
use sift::Config;
use wiremock::matchers::{method, path, query_param, query_param_is_missing};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn store_for(server: &MockServer) -> FeedStore {
    let config = Config {
        feed_base_url: server.uri(),
        page_size: 3,
        request_timeout_secs: 1,
        max_retries: 2,
        retry_base_delay_ms: 5,
        ..Config::default()
    };
    FeedStore::new(reqwest::Client::new(), &config).unwrap()
}

fn child(id: &str) -> Value {
    json!({
        "kind": "t3",
        "data": {
            "id": id,
            "title": format!("Post {}", id),
            "author": "ada",
            "subreddit": "rust",
            "created_utc": 1700000000.0,
            "num_comments": 4,
            "score": 10,
            "selftext": "",
            "url": format!("https://example.com/{}", id),
            "thumbnail": "https://example.com/thumb.png"
        }
    })
}

fn listing(ids: &[&str], after: Option<&str>) -> Value {
    json!({
        "kind": "Listing",
        "data": {
            "after": after,
            "children": ids.iter().map(|id| child(id)).collect::<Vec<_>>()
        }
    })
}

fn ids(store: &FeedStore) -> Vec<String> {
    store.items().into_iter().map(|item| item.id).collect()
}

// ============================================================================
// Pagination
// ============================================================================

#[tokio::test]
async fn test_pages_merge_and_deduplicate() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/topics/rust/listing"))
        .and(query_param("limit", "3"))
        .and(query_param_is_missing("after"))
        .respond_with(ResponseTemplate::new(200).set_body_json(listing(&["1", "2"], Some("c1"))))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/topics/rust/listing"))
        .and(query_param("after", "c1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(listing(&["2", "3"], None)))
        .expect(1)
        .mount(&server)
        .await;

    let store = store_for(&server);
    assert_eq!(store.fetch_next_page("rust").await.unwrap(), 2);
    assert_eq!(store.cursor().as_deref(), Some("c1"));
    assert!(!store.is_exhausted());

    assert_eq!(store.fetch_next_page("rust").await.unwrap(), 1);
    assert_eq!(ids(&store), vec!["1", "2", "3"]);
    assert_eq!(store.cursor(), None);
    assert!(store.is_exhausted());
    assert!(!store.is_loading());
    assert_eq!(store.error(), None);
}

#[tokio::test]
async fn test_exhausted_listing_makes_no_request() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/topics/rust/listing"))
        .respond_with(ResponseTemplate::new(200).set_body_json(listing(&["1"], None)))
        .expect(1)
        .mount(&server)
        .await;

    let store = store_for(&server);
    store.fetch_next_page("rust").await.unwrap();
    assert_eq!(store.fetch_next_page("rust").await.unwrap(), 0);
    assert_eq!(ids(&store), vec!["1"]);

    // reset starts the topic over
    store.reset();
    assert!(store.items().is_empty());
    assert!(!store.is_exhausted());
}

#[tokio::test]
async fn test_topic_switch_empties_collection() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/topics/rust/listing"))
        .respond_with(ResponseTemplate::new(200).set_body_json(listing(&["1", "2"], Some("c1"))))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/topics/go/listing"))
        .and(query_param_is_missing("after"))
        .respond_with(ResponseTemplate::new(200).set_body_json(listing(&["9"], Some("g1"))))
        .expect(1)
        .mount(&server)
        .await;

    let store = store_for(&server);
    store.fetch_next_page("rust").await.unwrap();
    store.fetch_next_page("go").await.unwrap();

    assert_eq!(store.topic(), "go");
    assert_eq!(ids(&store), vec!["9"]);
    assert_eq!(store.cursor().as_deref(), Some("g1"));
}

#[tokio::test]
async fn test_failed_page_keeps_collection() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/topics/rust/listing"))
        .and(query_param_is_missing("after"))
        .respond_with(ResponseTemplate::new(200).set_body_json(listing(&["1"], Some("c1"))))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/topics/rust/listing"))
        .and(query_param("after", "c1"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let store = store_for(&server);
    store.fetch_next_page("rust").await.unwrap();
    let err = store.fetch_next_page("rust").await.unwrap_err();

    assert!(matches!(err, FeedError::HttpStatus(404)));
    assert_eq!(ids(&store), vec!["1"]);
    assert_eq!(store.cursor().as_deref(), Some("c1"));
    assert!(!store.is_loading());
    let message = store.error().unwrap();
    assert!(message.starts_with("Error fetching posts for rust"), "{}", message);
}

#[tokio::test]
async fn test_malformed_listing() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/topics/rust/listing"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"error": 403})))
        .mount(&server)
        .await;

    let store = store_for(&server);
    let err = store.fetch_next_page("rust").await.unwrap_err();
    assert!(matches!(err, FeedError::MalformedResponse(_)));
    assert!(store.items().is_empty());
}

#[tokio::test]
async fn test_blank_topic_rejected() {
    let server = MockServer::start().await;
    let store = store_for(&server);
    let err = store.fetch_next_page("  ").await.unwrap_err();
    assert!(matches!(err, FeedError::InvalidTopic));
}

#[tokio::test]
async fn test_media_fields_normalized_on_merge() {
    let server = MockServer::start().await;
    let mut raw = child("1");
    raw["data"]["thumbnail"] = json!("self");
    raw["data"]["url"] = json!("");
    raw["data"]["preview"] = json!({"images": "nope"});
    Mock::given(method("GET"))
        .and(path("/topics/rust/listing"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {"after": null, "children": [raw]}
        })))
        .mount(&server)
        .await;

    let store = store_for(&server);
    store.fetch_next_page("rust").await.unwrap();

    let item = &store.items()[0];
    assert_eq!(item.thumbnail_url, FALLBACK_IMAGE_URL);
    assert_eq!(item.link_url, FALLBACK_IMAGE_URL);
    assert!(item.preview.is_none());
    assert!(!item.has_thumbnail());
}

// ============================================================================
// Concurrency
// ============================================================================

#[tokio::test]
async fn test_second_fetch_while_in_flight_is_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/topics/rust/listing"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(listing(&["1"], Some("c1")))
                .set_delay(Duration::from_millis(100)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let store = store_for(&server);
    let (first, second) = tokio::join!(
        store.fetch_next_page("rust"),
        store.fetch_next_page("rust")
    );

    assert_eq!(first.unwrap(), 1);
    assert!(matches!(second, Err(FeedError::FetchInProgress)));
    assert_eq!(ids(&store), vec!["1"]);
}

#[tokio::test]
async fn test_late_page_for_previous_topic_is_dropped() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/topics/rust/listing"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(listing(&["1"], Some("c1")))
                .set_delay(Duration::from_millis(200)),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/topics/go/listing"))
        .respond_with(ResponseTemplate::new(200).set_body_json(listing(&["9"], Some("g1"))))
        .mount(&server)
        .await;

    let store = store_for(&server);
    let (old, new) = tokio::join!(store.fetch_next_page("rust"), async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        store.fetch_next_page("go").await
    });

    assert!(matches!(old, Err(FeedError::Superseded)));
    assert_eq!(new.unwrap(), 1);
    assert_eq!(store.topic(), "go");
    assert_eq!(ids(&store), vec!["9"]);
}

// ============================================================================
// Retries and timeouts
// ============================================================================

#[tokio::test]
async fn test_server_error_is_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/topics/rust/listing"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/topics/rust/listing"))
        .respond_with(ResponseTemplate::new(200).set_body_json(listing(&["1"], None)))
        .mount(&server)
        .await;

    let store = store_for(&server);
    assert_eq!(store.fetch_next_page("rust").await.unwrap(), 1);
}

#[tokio::test]
async fn test_retries_exhausted() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/topics/rust/listing"))
        .respond_with(ResponseTemplate::new(429))
        // initial attempt plus max_retries
        .expect(3)
        .mount(&server)
        .await;

    let store = store_for(&server);
    let err = store.fetch_next_page("rust").await.unwrap_err();
    assert!(matches!(err, FeedError::RateLimited(2)));
}

#[tokio::test]
async fn test_slow_listing_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/topics/rust/listing"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(listing(&["1"], None))
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;

    let store = store_for(&server);
    let err = store.fetch_next_page("rust").await.unwrap_err();
    assert!(matches!(err, FeedError::Timeout));
    assert!(store.error().is_some());
}

// ============================================================================
// Single item
// ============================================================================

#[tokio::test]
async fn test_item_in_collection_makes_no_request() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/topics/rust/listing"))
        .respond_with(ResponseTemplate::new(200).set_body_json(listing(&["1", "2"], Some("c1"))))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/topics/rust/item/2"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let store = store_for(&server);
    store.fetch_next_page("rust").await.unwrap();
    let item = store.fetch_item_by_id("2").await.unwrap();
    assert_eq!(item.title, "Post 2");
}

#[tokio::test]
async fn test_item_fetched_remotely_is_not_merged() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/topics/VueJS/item/abc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            listing(&["abc"], None),
            {"kind": "Listing", "data": {"children": [{"kind": "t1", "data": {"id": "comment"}}]}}
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let store = store_for(&server);
    let item = store.fetch_item_by_id("abc").await.unwrap();

    assert_eq!(item.id, "abc");
    assert_eq!(item.comment_count, 4);
    assert!(store.items().is_empty());
    assert_eq!(store.error(), None);
}

#[tokio::test]
async fn test_item_single_listing_payload() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/topics/VueJS/item/abc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(listing(&["abc"], None)))
        .mount(&server)
        .await;

    let store = store_for(&server);
    assert_eq!(store.fetch_item_by_id("abc").await.unwrap().id, "abc");
}

#[tokio::test]
async fn test_item_id_mismatch_is_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/topics/VueJS/item/abc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(listing(&["other"], None)))
        .mount(&server)
        .await;

    let store = store_for(&server);
    let err = store.fetch_item_by_id("abc").await.unwrap_err();

    assert!(matches!(err, FeedError::NotFound(ref id) if id == "abc"));
    assert_eq!(store.error().as_deref(), Some("Post with id abc not found"));
}

#[tokio::test]
async fn test_item_fetch_failure_recorded() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/topics/VueJS/item/abc"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let store = store_for(&server);
    let err = store.fetch_item_by_id("abc").await.unwrap_err();

    assert!(matches!(err, FeedError::HttpStatus(403)));
    assert!(store
        .error()
        .unwrap()
        .starts_with("Error fetching post with id abc"));
}

#[tokio::test]
async fn test_subscriber_sees_merged_page() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/topics/rust/listing"))
        .respond_with(ResponseTemplate::new(200).set_body_json(listing(&["1"], Some("c1"))))
        .mount(&server)
        .await;

    let store = store_for(&server);
    let mut rx = store.subscribe();
    store.fetch_next_page("rust").await.unwrap();

    assert!(rx.has_changed().unwrap());
    let state = rx.borrow_and_update();
    assert_eq!(state.items.len(), 1);
    assert!(state.contains("1"));
}
