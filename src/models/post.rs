use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A stored post. `category` and `briefing_id` stay `None` until the
/// classifier and the briefing assembler get to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    pub author: String,
    pub content: String,
    pub content_text: String,
    pub media_urls: Vec<String>,
    pub post_url: String,
    pub published_at: Option<DateTime<Utc>>,
    pub fetched_at: DateTime<Utc>,
    pub category: Option<String>,
    pub category_reason: Option<String>,
    pub confidence: Option<f64>,
    pub briefing_id: Option<i64>,
    pub classify_attempts: u32,
    pub last_classify_attempt: Option<DateTime<Utc>>,
}

impl Post {
    pub fn has_media(&self) -> bool {
        !self.media_urls.is_empty()
    }
}

/// A normalized feed entry, before it has been stored.
#[derive(Debug, Clone, PartialEq)]
pub struct NewPost {
    pub id: String,
    pub author: String,
    pub content: String,
    pub content_text: String,
    pub media_urls: Vec<String>,
    pub post_url: String,
    pub published_at: Option<DateTime<Utc>>,
}

/// One classifier verdict for a post.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub post_id: String,
    pub category: String,
    pub confidence: f64,
    pub reason: String,
}
