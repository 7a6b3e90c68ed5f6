//! Paginated listing feed for a single active topic.
//!
//! - [`normalize`] - maps raw listing children onto [`FeedItem`], never failing
//! - [`FeedStore`] - cursor pagination, deduplicating merge, by-id lookup
//! - [`FeedState`] - the observable state a store publishes to subscribers
//!
//! # Example
//!
//! ```ignore
//! use sift::feed::FeedStore;
//!
//! let store = FeedStore::new(client, &config)?;
//! store.fetch_next_page("rust").await?;
//! store.fetch_next_page("rust").await?; // continues from the cursor
//! let item = store.fetch_item_by_id("1abc").await?;
//! ```

mod normalize;
mod state;
mod store;
mod types;

pub use normalize::{normalize, ListingPage};
pub use state::FeedState;
pub use store::FeedStore;
pub use types::{
    is_image_url, FeedError, FeedItem, ImageRef, Preview, PreviewImage, FALLBACK_IMAGE_URL,
};
