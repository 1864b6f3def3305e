//! PostStore - SQLite persistence for finished content
//!
//! Stores the terminal result of a scoreloop session (topic, title, content,
//! keywords, scores and free-form metadata) so it can be listed and read back
//! after the process exits.
//!
//! # Example
//!
//! ```ignore
//! use poststore::{NewPost, PostStore};
//!
//! let mut store = PostStore::open("content.db")?;
//! let id = store.save(&NewPost::new("Two-Tier ERP", "Title", "Body", 9))?;
//! let post = store.get(id)?;
//! ```

mod store;

pub use store::{NewPost, Post, PostStore};

/// Current time in milliseconds since the Unix epoch
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
