use reqwest::header::ACCEPT;
use serde_json::Value;
use std::time::Duration;
use tokio::sync::watch;
use url::Url;

use super::normalize::{normalize, parse_listing, ListingPage};
use super::state::{FeedState, PageStart};
use super::types::{FeedError, FeedItem};
use crate::config::{Config, ConfigError};
use crate::util::{read_limited_bytes, MAX_RESPONSE_SIZE};

/// Paginated, deduplicated feed for one active topic.
///
/// All operations take `&self`; state lives in a `watch` channel so UI code
/// can [`subscribe`](Self::subscribe) and re-render on every change.
///
/// # Concurrency
///
/// A second [`fetch_next_page`](Self::fetch_next_page) for a topic whose page
/// is still in flight is rejected with [`FeedError::FetchInProgress`].
/// Switching topic while a page is in flight supersedes it: the late response
/// is dropped instead of being merged into the new topic.
/// [`fetch_item_by_id`](Self::fetch_item_by_id) never touches the collection
/// and can run alongside anything.
pub struct FeedStore {
    client: reqwest::Client,
    base_url: Url,
    page_size: u32,
    timeout: Duration,
    max_retries: u32,
    retry_base_delay: Duration,
    state: watch::Sender<FeedState>,
}

impl FeedStore {
    pub fn new(client: reqwest::Client, config: &Config) -> Result<Self, ConfigError> {
        let base_url = config.feed_url()?;
        let (state, _) = watch::channel(FeedState::new(&config.default_topic));
        Ok(Self {
            client,
            base_url,
            page_size: config.page_size.max(1),
            timeout: config.request_timeout(),
            max_retries: config.max_retries,
            retry_base_delay: config.retry_base_delay(),
            state,
        })
    }

    // ========================================================================
    // Observation
    // ========================================================================

    pub fn subscribe(&self) -> watch::Receiver<FeedState> {
        self.state.subscribe()
    }

    pub fn items(&self) -> Vec<FeedItem> {
        self.state.borrow().items.clone()
    }

    pub fn topic(&self) -> String {
        self.state.borrow().topic.clone()
    }

    pub fn cursor(&self) -> Option<String> {
        self.state.borrow().after.clone()
    }

    pub fn is_exhausted(&self) -> bool {
        self.state.borrow().exhausted
    }

    pub fn is_loading(&self) -> bool {
        self.state.borrow().is_loading
    }

    pub fn error(&self) -> Option<String> {
        self.state.borrow().error.clone()
    }

    // ========================================================================
    // Operations
    // ========================================================================

    /// Fetch the next page of `topic` and merge it into the collection.
    ///
    /// A topic different from the active one empties the collection and the
    /// cursor before the request goes out. Once the server has returned a
    /// null cursor the topic counts as exhausted and further calls return
    /// `Ok(0)` without a request, until the topic changes or [`reset`](Self::reset).
    ///
    /// # Returns
    ///
    /// The number of items that were new to the collection.
    ///
    /// # Errors
    ///
    /// On failure the collection and cursor are left untouched and the error
    /// message is also recorded in the observable state.
    pub async fn fetch_next_page(&self, topic: &str) -> Result<usize, FeedError> {
        let topic = topic.trim();
        if topic.is_empty() {
            let err = FeedError::InvalidTopic;
            self.state
                .send_modify(|s| s.error = Some(err.to_string()));
            return Err(err);
        }

        let mut start = PageStart::Busy;
        self.state.send_modify(|s| start = s.begin_page(topic));

        let (generation, topic, after) = match start {
            PageStart::Fetch {
                generation,
                topic,
                after,
            } => (generation, topic, after),
            PageStart::Exhausted => {
                tracing::debug!(topic = %topic, "Listing exhausted, not fetching");
                return Ok(0);
            }
            PageStart::Busy => {
                tracing::debug!(topic = %topic, "Page fetch already in flight");
                return Err(FeedError::FetchInProgress);
            }
        };

        let url = self.listing_url(&topic, after.as_deref());
        tracing::debug!(url = %url, "Requesting listing page");

        let page: Result<ListingPage, FeedError> = async {
            let body = self.get_json(url).await?;
            parse_listing(body).map_err(|e| FeedError::MalformedResponse(e.to_string()))
        }
        .await;

        let mut outcome = Err(FeedError::Superseded);
        match page {
            Ok(page) => {
                let received = page.items.len();
                self.state
                    .send_modify(|s| outcome = s.finish_page(generation, page));
                match &outcome {
                    Ok(added) => tracing::info!(
                        topic = %topic,
                        received = received,
                        added = added,
                        "Merged listing page"
                    ),
                    Err(_) => tracing::debug!(topic = %topic, "Dropping page for superseded topic"),
                }
            }
            Err(e) => {
                tracing::warn!(topic = %topic, error = %e, "Listing fetch failed");
                self.state.send_modify(|s| s.fail_page(generation, &e));
                outcome = Err(e);
            }
        }
        outcome
    }

    /// Look up one item, preferring the in-memory collection.
    ///
    /// Items already in the collection are returned without a request.
    /// Otherwise the item endpoint of the active topic is queried; the result
    /// is returned but never merged into the collection.
    ///
    /// # Errors
    ///
    /// - [`FeedError::NotFound`] if the response is empty or carries another id
    /// - network, status and timeout errors as for page fetches
    pub async fn fetch_item_by_id(&self, id: &str) -> Result<FeedItem, FeedError> {
        let topic = {
            let state = self.state.borrow();
            if let Some(item) = state.find(id) {
                tracing::debug!(id = %id, "Item found in local collection");
                return Ok(item.clone());
            }
            state.topic.clone()
        };

        let url = self.item_url(&topic, id);
        tracing::debug!(url = %url, "Requesting single item");

        let result = match self.get_json(url).await {
            Ok(body) => match first_child(body) {
                Some(raw) => {
                    let item = normalize(&raw);
                    if item.id == id {
                        Ok(item)
                    } else {
                        tracing::warn!(requested = %id, received = %item.id, "Item id mismatch");
                        Err(FeedError::NotFound(id.to_string()))
                    }
                }
                None => Err(FeedError::NotFound(id.to_string())),
            },
            Err(e) => Err(e),
        };

        let message = match &result {
            Ok(_) => None,
            Err(FeedError::NotFound(_)) => Some(format!("Post with id {} not found", id)),
            Err(e) => {
                tracing::warn!(id = %id, error = %e, "Item fetch failed");
                Some(format!("Error fetching post with id {}: {}", id, e))
            }
        };
        self.state.send_modify(|s| s.error = message);
        result
    }

    /// Drop the collection, cursor and exhausted flag of the active topic.
    ///
    /// A page still in flight is superseded and will not be merged.
    pub fn reset(&self) {
        self.state.send_modify(FeedState::reset);
    }

    // ========================================================================
    // HTTP
    // ========================================================================

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn listing_url(&self, topic: &str, after: Option<&str>) -> Url {
        let mut url = self.endpoint(&["topics", topic, "listing"]);
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("limit", &self.page_size.to_string());
            if let Some(after) = after {
                query.append_pair("after", after);
            }
        }
        url
    }

    fn item_url(&self, topic: &str, id: &str) -> Url {
        self.endpoint(&["topics", topic, "item", id])
    }

    /// GET a JSON document, retrying 429 and 5xx with exponential backoff.
    async fn get_json(&self, url: Url) -> Result<Value, FeedError> {
        let mut retry_count = 0;

        let bytes = loop {
            let response = tokio::time::timeout(
                self.timeout,
                self.client
                    .get(url.clone())
                    .header(ACCEPT, "application/json")
                    .send(),
            )
            .await
            .map_err(|_| FeedError::Timeout)?
            .map_err(FeedError::Network)?;

            let status = response.status();
            if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                if retry_count >= self.max_retries {
                    return Err(if status.is_server_error() {
                        FeedError::HttpStatus(status.as_u16())
                    } else {
                        FeedError::RateLimited(self.max_retries)
                    });
                }

                let delay = backoff_delay(self.retry_base_delay, retry_count);
                tracing::warn!(
                    url = %url,
                    status = %status,
                    retry = retry_count,
                    delay_ms = delay.as_millis() as u64,
                    "Transient listing error, backing off"
                );
                tokio::time::sleep(delay).await;
                retry_count += 1;
                continue;
            }

            if !status.is_success() {
                return Err(FeedError::HttpStatus(status.as_u16()));
            }

            break tokio::time::timeout(
                self.timeout,
                read_limited_bytes(response, MAX_RESPONSE_SIZE),
            )
            .await
            .map_err(|_| FeedError::Timeout)??;
        };

        serde_json::from_slice(&bytes).map_err(|e| FeedError::MalformedResponse(e.to_string()))
    }
}

/// `base * 2^attempt`, saturating instead of overflowing.
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(2u32.saturating_pow(attempt))
}

/// First child of a single-item payload.
///
/// The item endpoint answers either with one listing or with an array of
/// listings (post first, comments after).
fn first_child(body: Value) -> Option<Value> {
    let listing = match body {
        Value::Array(mut listings) if !listings.is_empty() => listings.swap_remove(0),
        Value::Array(_) => return None,
        other => other,
    };

    match listing {
        Value::Object(mut map) => match map.remove("data") {
            Some(Value::Object(mut data)) => match data.remove("children") {
                Some(Value::Array(mut children)) if !children.is_empty() => {
                    Some(children.swap_remove(0))
                }
                _ => None,
            },
            _ => None,
        },
        _ => None,
    }
}
