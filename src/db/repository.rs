use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, params_from_iter, OptionalExtension, Row, TransactionBehavior};
use tokio_rusqlite::Connection;

use crate::error::Result;
use crate::models::{Briefing, Classification, NewPost, Post, MUST_READ};

use super::schema::SCHEMA;

const POST_COLUMNS: &str = "id, author, content, content_text, media_urls, post_url, published_at, \
     fetched_at, category, category_reason, confidence, briefing_id, classify_attempts, \
     last_classify_attempt";

/// Owns every post, briefing and settings row. All mutation goes through
/// here; each method is a single closure on the connection thread, so each
/// is atomic with respect to the others.
#[derive(Clone)]
pub struct Repository {
    pub(super) conn: Connection,
}

impl Repository {
    pub async fn new(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path).await?;

        conn.call(|conn| {
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))?;
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;

        Ok(Self { conn })
    }

    #[cfg(test)]
    pub async fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().await?;
        conn.call(|conn| {
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;
        Ok(Self { conn })
    }

    pub async fn close(self) -> Result<()> {
        self.conn.close().await?;
        Ok(())
    }

    // Post operations

    /// Inserts posts whose id is not stored yet and returns exactly those.
    /// Already-stored ids are left untouched.
    pub async fn store_posts(&self, posts: Vec<NewPost>) -> Result<Vec<NewPost>> {
        let fetched_at = to_db_timestamp(Utc::now());
        let rows = posts
            .into_iter()
            .map(|post| {
                let media = serde_json::to_string(&post.media_urls)?;
                Ok((post, media))
            })
            .collect::<Result<Vec<_>>>()?;

        let inserted = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let mut inserted = Vec::new();
                {
                    let mut stmt = tx.prepare(
                        r#"INSERT OR IGNORE INTO posts
                               (id, author, content, content_text, media_urls, post_url, published_at, fetched_at)
                           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"#,
                    )?;
                    for (post, media) in rows {
                        let changed = stmt.execute(params![
                            post.id,
                            post.author,
                            post.content,
                            post.content_text,
                            media,
                            post.post_url,
                            post.published_at.map(to_db_timestamp),
                            fetched_at,
                        ])?;
                        if changed > 0 {
                            inserted.push(post);
                        }
                    }
                }
                tx.commit()?;
                Ok(inserted)
            })
            .await?;
        Ok(inserted)
    }

    /// Marks still-unclassified, unassigned posts by any of `handles`
    /// (already lowercased) as must-read. Returns the number of posts tagged.
    pub async fn tag_must_reads(&self, handles: Vec<String>) -> Result<usize> {
        if handles.is_empty() {
            return Ok(0);
        }

        let tagged = self
            .conn
            .call(move |conn| {
                let placeholders = (2..handles.len() + 2)
                    .map(|i| format!("?{}", i))
                    .collect::<Vec<_>>()
                    .join(", ");
                let sql = format!(
                    r#"UPDATE posts SET category = ?1, confidence = 1.0,
                           category_reason = 'Must-read account'
                       WHERE LOWER(author) IN ({})
                         AND category IS NULL AND briefing_id IS NULL"#,
                    placeholders
                );
                let mut values = Vec::with_capacity(handles.len() + 1);
                values.push(MUST_READ.to_string());
                values.extend(handles);
                let changed = conn.execute(&sql, params_from_iter(values))?;
                Ok(changed)
            })
            .await?;
        Ok(tagged)
    }

    /// Posts with neither a category nor a briefing, oldest fetch first.
    pub async fn fetch_unclassified(&self) -> Result<Vec<Post>> {
        let posts = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(&format!(
                    r#"SELECT {} FROM posts
                       WHERE category IS NULL AND briefing_id IS NULL
                       ORDER BY fetched_at ASC, id ASC"#,
                    POST_COLUMNS
                ))?;
                let posts = stmt
                    .query_map([], post_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(posts)
            })
            .await?;
        Ok(posts)
    }

    /// Applies one batch of classifier verdicts in a single transaction.
    /// A verdict only lands on a post whose category is still null.
    /// Returns how many posts were updated.
    pub async fn apply_classifications(&self, verdicts: Vec<Classification>) -> Result<usize> {
        let applied = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let mut applied = 0;
                {
                    let mut stmt = tx.prepare(
                        r#"UPDATE posts SET category = ?1, confidence = ?2, category_reason = ?3
                           WHERE id = ?4 AND category IS NULL"#,
                    )?;
                    for verdict in verdicts {
                        applied += stmt.execute(params![
                            verdict.category,
                            verdict.confidence,
                            verdict.reason,
                            verdict.post_id,
                        ])?;
                    }
                }
                tx.commit()?;
                Ok(applied)
            })
            .await?;
        Ok(applied)
    }

    /// Bumps the attempt counter on those of `ids` that are still unclassified.
    pub async fn record_classification_attempt(&self, ids: Vec<String>) -> Result<()> {
        let attempted_at = to_db_timestamp(Utc::now());
        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                {
                    let mut stmt = tx.prepare(
                        r#"UPDATE posts SET classify_attempts = classify_attempts + 1,
                               last_classify_attempt = ?1
                           WHERE id = ?2 AND category IS NULL"#,
                    )?;
                    for id in ids {
                        stmt.execute(params![attempted_at, id])?;
                    }
                }
                tx.commit()?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Manual override. Ignores the null-category guard. Returns false if
    /// no post has this id.
    pub async fn reclassify(&self, id: &str, category: &str) -> Result<bool> {
        let id = id.to_string();
        let category = category.to_string();
        let changed = self
            .conn
            .call(move |conn| {
                let changed = conn.execute(
                    r#"UPDATE posts SET category = ?1, category_reason = 'Manual override',
                           confidence = 1.0
                       WHERE id = ?2"#,
                    params![category, id],
                )?;
                Ok(changed)
            })
            .await?;
        Ok(changed > 0)
    }

    pub async fn get_post(&self, id: &str) -> Result<Option<Post>> {
        let id = id.to_string();
        let post = self
            .conn
            .call(move |conn| {
                let mut stmt =
                    conn.prepare(&format!("SELECT {} FROM posts WHERE id = ?1", POST_COLUMNS))?;
                let post = stmt.query_row(params![id], post_from_row).optional()?;
                Ok(post)
            })
            .await?;
        Ok(post)
    }

    // Briefing operations

    /// Claims every classified, unassigned post into a new briefing.
    ///
    /// Selection, briefing insert and assignment run in one immediate
    /// transaction, so the claimed set is exactly the selected set. Returns
    /// `None` without creating a row when there is nothing to claim.
    pub async fn claim_for_briefing(&self) -> Result<Option<i64>> {
        let now = Utc::now();
        let briefing_id = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

                let selected: Vec<(String, Option<String>)> = {
                    let mut stmt = tx.prepare(
                        r#"SELECT id, published_at FROM posts
                           WHERE briefing_id IS NULL AND category IS NOT NULL
                           ORDER BY published_at ASC"#,
                    )?;
                    let rows = stmt
                        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                        .collect::<std::result::Result<Vec<_>, _>>()?;
                    rows
                };

                if selected.is_empty() {
                    return Ok(None);
                }

                let published: Vec<DateTime<Utc>> = selected
                    .iter()
                    .filter_map(|(_, ts)| ts.as_deref().and_then(parse_datetime))
                    .collect();
                let period_start = published.iter().min().copied().unwrap_or(now);
                let period_end = published.iter().max().copied().unwrap_or(now);

                tx.execute(
                    r#"INSERT INTO briefings (generated_at, period_start, period_end, post_count, summary)
                       VALUES (?1, ?2, ?3, ?4, '')"#,
                    params![
                        to_db_timestamp(now),
                        to_db_timestamp(period_start),
                        to_db_timestamp(period_end),
                        selected.len() as i64,
                    ],
                )?;
                let briefing_id = tx.last_insert_rowid();

                {
                    let mut stmt = tx.prepare("UPDATE posts SET briefing_id = ?1 WHERE id = ?2")?;
                    for (id, _) in &selected {
                        stmt.execute(params![briefing_id, id])?;
                    }
                }

                tx.commit()?;
                Ok(Some(briefing_id))
            })
            .await?;
        Ok(briefing_id)
    }

    pub async fn get_briefing(&self, id: i64) -> Result<Option<Briefing>> {
        let briefing = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    r#"SELECT id, generated_at, period_start, period_end, post_count, summary
                       FROM briefings WHERE id = ?1"#,
                )?;
                let briefing = stmt.query_row(params![id], briefing_from_row).optional()?;
                Ok(briefing)
            })
            .await?;
        Ok(briefing)
    }

    pub async fn list_briefings(&self) -> Result<Vec<Briefing>> {
        let briefings = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    r#"SELECT id, generated_at, period_start, period_end, post_count, summary
                       FROM briefings ORDER BY id DESC"#,
                )?;
                let briefings = stmt
                    .query_map([], briefing_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(briefings)
            })
            .await?;
        Ok(briefings)
    }

    /// Posts in a briefing, newest first, optionally limited to one category.
    pub async fn posts_in_briefing(
        &self,
        briefing_id: i64,
        category: Option<String>,
    ) -> Result<Vec<Post>> {
        let posts = self
            .conn
            .call(move |conn| {
                let posts = match category {
                    Some(category) => {
                        let mut stmt = conn.prepare(&format!(
                            r#"SELECT {} FROM posts WHERE briefing_id = ?1 AND category = ?2
                               ORDER BY published_at DESC"#,
                            POST_COLUMNS
                        ))?;
                        let rows = stmt
                            .query_map(params![briefing_id, category], post_from_row)?
                            .collect::<std::result::Result<Vec<_>, _>>()?;
                        rows
                    }
                    None => {
                        let mut stmt = conn.prepare(&format!(
                            r#"SELECT {} FROM posts WHERE briefing_id = ?1
                               ORDER BY published_at DESC"#,
                            POST_COLUMNS
                        ))?;
                        let rows = stmt
                            .query_map(params![briefing_id], post_from_row)?
                            .collect::<std::result::Result<Vec<_>, _>>()?;
                        rows
                    }
                };
                Ok(posts)
            })
            .await?;
        Ok(posts)
    }
}

/// RFC3339 in UTC with a `Z` suffix, so stored timestamps sort as text.
pub(crate) fn to_db_timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    // SQLite datetime('now') format
    if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(naive.and_utc());
    }
    None
}

fn required_datetime(row: &Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_datetime(&raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Text,
            format!("invalid timestamp '{}'", raw).into(),
        )
    })
}

fn optional_datetime(row: &Row, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    Ok(row
        .get::<_, Option<String>>(idx)?
        .and_then(|s| parse_datetime(&s)))
}

fn post_from_row(row: &Row) -> rusqlite::Result<Post> {
    let media_json: String = row.get(4)?;
    let media_urls: Vec<String> = serde_json::from_str(&media_json)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(4, Type::Text, Box::new(e)))?;

    Ok(Post {
        id: row.get(0)?,
        author: row.get(1)?,
        content: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
        content_text: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
        media_urls,
        post_url: row.get::<_, Option<String>>(5)?.unwrap_or_default(),
        published_at: optional_datetime(row, 6)?,
        fetched_at: required_datetime(row, 7)?,
        category: row.get(8)?,
        category_reason: row.get(9)?,
        confidence: row.get(10)?,
        briefing_id: row.get(11)?,
        classify_attempts: row.get(12)?,
        last_classify_attempt: optional_datetime(row, 13)?,
    })
}

fn briefing_from_row(row: &Row) -> rusqlite::Result<Briefing> {
    let generated_at = required_datetime(row, 1)?;
    Ok(Briefing {
        id: row.get(0)?,
        generated_at,
        period_start: optional_datetime(row, 2)?.unwrap_or(generated_at),
        period_end: optional_datetime(row, 3)?.unwrap_or(generated_at),
        post_count: row.get(4)?,
        summary: row.get::<_, Option<String>>(5)?.unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn new_post(id: &str, author: &str, published: Option<DateTime<Utc>>) -> NewPost {
        NewPost {
            id: id.to_string(),
            author: author.to_string(),
            content: format!("<p>{}</p>", id),
            content_text: format!("text of {}", id),
            media_urls: vec![],
            post_url: format!("https://x.com/{}/status/{}", author, id),
            published_at: published,
        }
    }

    fn verdict(id: &str, category: &str, confidence: f64) -> Classification {
        Classification {
            post_id: id.to_string(),
            category: category.to_string(),
            confidence,
            reason: "test".to_string(),
        }
    }

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, hour, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn store_is_insert_once() {
        let repo = Repository::open_in_memory().await.unwrap();
        let batch = vec![
            new_post("a", "alice", Some(at(9))),
            new_post("b", "bob", None),
            new_post("c", "carol", Some(at(10))),
        ];

        let first = repo.store_posts(batch.clone()).await.unwrap();
        assert_eq!(first.len(), 3);

        let mut changed = batch.clone();
        changed[0].content_text = "edited".to_string();
        let second = repo.store_posts(changed).await.unwrap();
        assert!(second.is_empty());

        let a = repo.get_post("a").await.unwrap().unwrap();
        assert_eq!(a.content_text, "text of a");
        assert_eq!(repo.fetch_unclassified().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn store_skips_duplicate_ids_within_one_call() {
        let repo = Repository::open_in_memory().await.unwrap();
        let inserted = repo
            .store_posts(vec![new_post("a", "alice", None), new_post("a", "alice", None)])
            .await
            .unwrap();
        assert_eq!(inserted.len(), 1);
    }

    #[tokio::test]
    async fn media_urls_round_trip_in_order() {
        let repo = Repository::open_in_memory().await.unwrap();
        let mut post = new_post("m", "mia", None);
        post.media_urls = vec!["https://img/2.png".to_string(), "https://img/1.png".to_string()];
        repo.store_posts(vec![post]).await.unwrap();

        let stored = repo.get_post("m").await.unwrap().unwrap();
        assert_eq!(stored.media_urls, vec!["https://img/2.png", "https://img/1.png"]);
        assert!(stored.has_media());
    }

    #[tokio::test]
    async fn tag_must_reads_matches_case_insensitively() {
        let repo = Repository::open_in_memory().await.unwrap();
        repo.store_posts(vec![new_post("a", "Alice", None), new_post("b", "bob", None)])
            .await
            .unwrap();

        let tagged = repo.tag_must_reads(vec!["alice".to_string()]).await.unwrap();
        assert_eq!(tagged, 1);

        let a = repo.get_post("a").await.unwrap().unwrap();
        assert_eq!(a.category.as_deref(), Some(MUST_READ));
        assert_eq!(a.confidence, Some(1.0));
        assert_eq!(a.category_reason.as_deref(), Some("Must-read account"));

        // Second pass finds nothing left to tag.
        assert_eq!(repo.tag_must_reads(vec!["alice".to_string()]).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn tag_must_reads_leaves_classified_posts_alone() {
        let repo = Repository::open_in_memory().await.unwrap();
        repo.store_posts(vec![new_post("a", "alice", None)]).await.unwrap();
        repo.apply_classifications(vec![verdict("a", "funny", 0.7)])
            .await
            .unwrap();

        assert_eq!(repo.tag_must_reads(vec!["alice".to_string()]).await.unwrap(), 0);
        let a = repo.get_post("a").await.unwrap().unwrap();
        assert_eq!(a.category.as_deref(), Some("funny"));
    }

    #[tokio::test]
    async fn classification_never_overwrites_existing_category() {
        let repo = Repository::open_in_memory().await.unwrap();
        repo.store_posts(vec![new_post("a", "alice", None)]).await.unwrap();

        assert_eq!(
            repo.apply_classifications(vec![verdict("a", "viral", 0.9)]).await.unwrap(),
            1
        );
        assert_eq!(
            repo.apply_classifications(vec![verdict("a", "skip", 0.2)]).await.unwrap(),
            0
        );

        let a = repo.get_post("a").await.unwrap().unwrap();
        assert_eq!(a.category.as_deref(), Some("viral"));
        assert_eq!(a.confidence, Some(0.9));
    }

    #[tokio::test]
    async fn reclassify_overrides_any_category() {
        let repo = Repository::open_in_memory().await.unwrap();
        repo.store_posts(vec![new_post("a", "alice", None)]).await.unwrap();
        repo.apply_classifications(vec![verdict("a", "viral", 0.4)])
            .await
            .unwrap();

        assert!(repo.reclassify("a", "charts").await.unwrap());
        assert!(!repo.reclassify("missing", "charts").await.unwrap());

        let a = repo.get_post("a").await.unwrap().unwrap();
        assert_eq!(a.category.as_deref(), Some("charts"));
        assert_eq!(a.confidence, Some(1.0));
        assert_eq!(a.category_reason.as_deref(), Some("Manual override"));
    }

    #[tokio::test]
    async fn attempts_only_count_for_unclassified_posts() {
        let repo = Repository::open_in_memory().await.unwrap();
        repo.store_posts(vec![new_post("a", "alice", None), new_post("b", "bob", None)])
            .await
            .unwrap();
        repo.apply_classifications(vec![verdict("a", "viral", 0.9)])
            .await
            .unwrap();

        repo.record_classification_attempt(vec!["a".to_string(), "b".to_string()])
            .await
            .unwrap();

        let a = repo.get_post("a").await.unwrap().unwrap();
        let b = repo.get_post("b").await.unwrap().unwrap();
        assert_eq!(a.classify_attempts, 0);
        assert_eq!(b.classify_attempts, 1);
        assert!(b.last_classify_attempt.is_some());
    }

    #[tokio::test]
    async fn claim_takes_all_classified_posts_with_time_range() {
        let repo = Repository::open_in_memory().await.unwrap();
        repo.store_posts(vec![
            new_post("t2", "a", Some(at(11))),
            new_post("t1", "a", Some(at(9))),
            new_post("t3", "a", Some(at(14))),
            new_post("pending", "a", Some(at(8))),
        ])
        .await
        .unwrap();
        repo.apply_classifications(vec![
            verdict("t1", "viral", 0.9),
            verdict("t2", "skip", 0.5),
            verdict("t3", "charts", 0.8),
        ])
        .await
        .unwrap();

        let id = repo.claim_for_briefing().await.unwrap().expect("briefing");
        let briefing = repo.get_briefing(id).await.unwrap().unwrap();
        assert_eq!(briefing.post_count, 3);
        assert_eq!(briefing.period_start, at(9));
        assert_eq!(briefing.period_end, at(14));

        let posts = repo.posts_in_briefing(id, None).await.unwrap();
        let ids: Vec<_> = posts.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["t3", "t2", "t1"]);

        let pending = repo.get_post("pending").await.unwrap().unwrap();
        assert!(pending.briefing_id.is_none());

        assert_eq!(repo.claim_for_briefing().await.unwrap(), None);
        assert_eq!(repo.list_briefings().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn claim_without_timestamps_uses_now() {
        let repo = Repository::open_in_memory().await.unwrap();
        repo.store_posts(vec![new_post("a", "alice", None)]).await.unwrap();
        repo.apply_classifications(vec![verdict("a", "viral", 0.9)])
            .await
            .unwrap();

        let before = Utc::now() - chrono::Duration::seconds(1);
        let id = repo.claim_for_briefing().await.unwrap().unwrap();
        let briefing = repo.get_briefing(id).await.unwrap().unwrap();
        assert!(briefing.period_start >= before);
        assert_eq!(briefing.period_start, briefing.period_end);
    }

    #[tokio::test]
    async fn claimed_posts_are_not_reclaimed_or_tagged() {
        let repo = Repository::open_in_memory().await.unwrap();
        repo.store_posts(vec![new_post("a", "alice", None)]).await.unwrap();
        repo.apply_classifications(vec![verdict("a", "viral", 0.9)])
            .await
            .unwrap();
        let first = repo.claim_for_briefing().await.unwrap().unwrap();

        repo.store_posts(vec![new_post("b", "bob", None)]).await.unwrap();
        repo.apply_classifications(vec![verdict("b", "funny", 0.6)])
            .await
            .unwrap();
        let second = repo.claim_for_briefing().await.unwrap().unwrap();
        assert_ne!(first, second);

        assert_eq!(repo.posts_in_briefing(first, None).await.unwrap().len(), 1);
        let filtered = repo
            .posts_in_briefing(second, Some("funny".to_string()))
            .await
            .unwrap();
        assert_eq!(filtered.len(), 1);
        assert!(repo
            .posts_in_briefing(second, Some("viral".to_string()))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn file_backed_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("posts.db");
        let path = path.to_string_lossy().to_string();

        let repo = Repository::new(&path).await.unwrap();
        repo.store_posts(vec![new_post("a", "alice", None)]).await.unwrap();
        repo.close().await.unwrap();

        let reopened = Repository::new(&path).await.unwrap();
        let again = reopened
            .store_posts(vec![new_post("a", "alice", None)])
            .await
            .unwrap();
        assert!(again.is_empty());
        assert!(reopened.get_post("a").await.unwrap().is_some());
    }
}
