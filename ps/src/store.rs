//! Core PostStore implementation

use std::fs;
use std::path::Path;

use eyre::{Context, Result};
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::now_ms;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS posts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    topic TEXT NOT NULL,
    title TEXT NOT NULL,
    content TEXT NOT NULL,
    keywords TEXT NOT NULL DEFAULT '[]',
    score INTEGER NOT NULL,
    secondary_score INTEGER,
    metadata TEXT NOT NULL DEFAULT '{}',
    created_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_posts_created_at ON posts(created_at DESC);
CREATE INDEX IF NOT EXISTS idx_posts_topic ON posts(topic);
"#;

/// A finished post ready to be stored
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPost {
    pub topic: String,
    pub title: String,
    pub content: String,
    pub keywords: Vec<String>,
    /// Authoritative (verified) score, 0-10
    pub score: u8,
    /// Preliminary score, if one was produced
    pub secondary_score: Option<u8>,
    /// Arbitrary metadata (session id, terminal state, model, ...)
    pub metadata: serde_json::Value,
}

impl NewPost {
    /// Create a post with no keywords, secondary score or metadata
    pub fn new(topic: impl Into<String>, title: impl Into<String>, content: impl Into<String>, score: u8) -> Self {
        Self {
            topic: topic.into(),
            title: title.into(),
            content: content.into(),
            keywords: Vec::new(),
            score,
            secondary_score: None,
            metadata: serde_json::json!({}),
        }
    }
}

/// A stored post
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Post {
    pub id: i64,
    pub topic: String,
    pub title: String,
    pub content: String,
    pub keywords: Vec<String>,
    pub score: u8,
    pub secondary_score: Option<u8>,
    pub metadata: serde_json::Value,
    /// Creation timestamp (milliseconds since Unix epoch)
    pub created_at: i64,
}

/// SQLite-backed post store
pub struct PostStore {
    conn: Connection,
}

impl PostStore {
    /// Open or create a store at the given database path
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!(?path, "PostStore::open: called");
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).context("Failed to create store directory")?;
        }

        let conn = Connection::open(path).context(format!("Failed to open database {}", path.display()))?;
        let store = Self::init(conn)?;
        info!("Opened post store at {}", path.display());
        Ok(store)
    }

    /// Open a throwaway in-memory store
    pub fn open_in_memory() -> Result<Self> {
        debug!("PostStore::open_in_memory: called");
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA).context("Failed to run schema")?;
        Ok(Self { conn })
    }

    /// Persist a post, returning its id
    pub fn save(&mut self, post: &NewPost) -> Result<i64> {
        debug!(topic = %post.topic, score = post.score, "PostStore::save: called");
        let keywords = serde_json::to_string(&post.keywords).context("Failed to encode keywords")?;
        let metadata = serde_json::to_string(&post.metadata).context("Failed to encode metadata")?;

        self.conn
            .execute(
                "INSERT INTO posts (topic, title, content, keywords, score, secondary_score, metadata, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    post.topic,
                    post.title,
                    post.content,
                    keywords,
                    post.score,
                    post.secondary_score,
                    metadata,
                    now_ms(),
                ],
            )
            .context("Failed to insert post")?;

        let id = self.conn.last_insert_rowid();
        info!(id, topic = %post.topic, "Saved post");
        Ok(id)
    }

    /// Fetch a post by id
    pub fn get(&self, id: i64) -> Result<Option<Post>> {
        debug!(id, "PostStore::get: called");
        let post = self
            .conn
            .query_row(
                "SELECT id, topic, title, content, keywords, score, secondary_score, metadata, created_at
                 FROM posts WHERE id = ?1",
                params![id],
                row_to_raw,
            )
            .optional()
            .context("Failed to query post")?;

        post.map(RawPost::decode).transpose()
    }

    /// List posts, newest first
    pub fn list(&self, limit: usize) -> Result<Vec<Post>> {
        debug!(limit, "PostStore::list: called");
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, topic, title, content, keywords, score, secondary_score, metadata, created_at
                 FROM posts ORDER BY created_at DESC, id DESC LIMIT ?1",
            )
            .context("Failed to prepare list query")?;

        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = stmt
            .query_map(params![limit], row_to_raw)
            .context("Failed to list posts")?;

        let mut posts = Vec::new();
        for raw in rows {
            posts.push(raw.context("Failed to read post row")?.decode()?);
        }
        debug!(count = posts.len(), "PostStore::list: loaded");
        Ok(posts)
    }

    /// Number of stored posts
    pub fn count(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM posts", [], |row| row.get(0))
            .context("Failed to count posts")?;
        Ok(count.max(0) as usize)
    }
}

/// Row as stored, before JSON columns are decoded
struct RawPost {
    id: i64,
    topic: String,
    title: String,
    content: String,
    keywords: String,
    score: u8,
    secondary_score: Option<u8>,
    metadata: String,
    created_at: i64,
}

fn row_to_raw(row: &Row<'_>) -> rusqlite::Result<RawPost> {
    Ok(RawPost {
        id: row.get(0)?,
        topic: row.get(1)?,
        title: row.get(2)?,
        content: row.get(3)?,
        keywords: row.get(4)?,
        score: row.get(5)?,
        secondary_score: row.get(6)?,
        metadata: row.get(7)?,
        created_at: row.get(8)?,
    })
}

impl RawPost {
    fn decode(self) -> Result<Post> {
        let keywords = serde_json::from_str(&self.keywords).context(format!("Bad keywords for post {}", self.id))?;
        let metadata = serde_json::from_str(&self.metadata).context(format!("Bad metadata for post {}", self.id))?;
        Ok(Post {
            id: self.id,
            topic: self.topic,
            title: self.title,
            content: self.content,
            keywords,
            score: self.score,
            secondary_score: self.secondary_score,
            metadata,
            created_at: self.created_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample(topic: &str, score: u8) -> NewPost {
        NewPost {
            topic: topic.to_string(),
            title: format!("About {}", topic),
            content: "# Heading\nBody".to_string(),
            keywords: vec!["erp".to_string(), "cloud".to_string()],
            score,
            secondary_score: Some(7),
            metadata: serde_json::json!({ "state": "converged", "rounds": 2 }),
        }
    }

    #[test]
    fn test_save_and_get() {
        let mut store = PostStore::open_in_memory().unwrap();
        let id = store.save(&sample("Two-Tier ERP", 10)).unwrap();

        let post = store.get(id).unwrap().expect("post should exist");
        assert_eq!(post.topic, "Two-Tier ERP");
        assert_eq!(post.keywords, vec!["erp", "cloud"]);
        assert_eq!(post.score, 10);
        assert_eq!(post.secondary_score, Some(7));
        assert_eq!(post.metadata["state"], "converged");
        assert!(post.created_at > 0);
    }

    #[test]
    fn test_get_missing_returns_none() {
        let store = PostStore::open_in_memory().unwrap();
        assert!(store.get(42).unwrap().is_none());
    }

    #[test]
    fn test_list_newest_first_with_limit() {
        let mut store = PostStore::open_in_memory().unwrap();
        store.save(&sample("first", 5)).unwrap();
        store.save(&sample("second", 6)).unwrap();
        store.save(&sample("third", 7)).unwrap();

        let posts = store.list(2).unwrap();
        assert_eq!(posts.len(), 2);
        assert_eq!(posts[0].topic, "third");
        assert_eq!(posts[1].topic, "second");
        assert_eq!(store.count().unwrap(), 3);
    }

    #[test]
    fn test_secondary_score_optional() {
        let mut store = PostStore::open_in_memory().unwrap();
        let id = store.save(&NewPost::new("topic", "title", "body", 3)).unwrap();
        let post = store.get(id).unwrap().unwrap();
        assert_eq!(post.secondary_score, None);
        assert!(post.keywords.is_empty());
    }

    #[test]
    fn test_open_creates_parent_dirs_and_persists() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join("content.db");

        {
            let mut store = PostStore::open(&path).unwrap();
            store.save(&sample("persisted", 8)).unwrap();
        }

        let store = PostStore::open(&path).unwrap();
        let posts = store.list(10).unwrap();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].topic, "persisted");
    }
}
