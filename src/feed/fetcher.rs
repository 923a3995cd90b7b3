use std::time::Duration;

use feed_rs::model::{Entry, Person};
use feed_rs::parser;
use futures::stream::{self, StreamExt};
use regex::Regex;
use reqwest::header::LOCATION;
use reqwest::{redirect, Client};
use url::Url;

use crate::error::{AppError, Result};
use crate::models::{normalize_handle, NewPost};

const IMG_SRC_PATTERN: &str = r#"<img[^>]*\ssrc=["']([^"']+)["']"#;
const MAX_CONCURRENT_FETCHES: usize = 5;

/// What came back from the feed endpoint.
#[derive(Debug)]
enum FetchResult {
    Document(Vec<u8>),
    /// A 3xx; redirects are never followed.
    Redirected(Option<String>),
}

pub struct FeedFetcher {
    client: Client,
    base_url: Url,
}

impl FeedFetcher {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .redirect(redirect::Policy::none())
            .user_agent("twit-muncher/1.0")
            .build()?;

        let base_url = Url::parse(base_url)
            .map_err(|e| AppError::Config(format!("invalid feed_base_url '{}': {}", base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(AppError::Config(format!(
                "feed_base_url '{}' cannot carry a path",
                base_url
            )));
        }

        Ok(Self { client, base_url })
    }

    /// `<base>/twitter/list/<id>`, with the id percent-encoded as one segment.
    pub fn list_url(&self, list_id: &str) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .extend(["twitter", "list", list_id.trim()]);
        }
        url
    }

    /// Fetches and normalizes one list feed. Any failure is logged and
    /// yields an empty list, so one bad feed never stops the others.
    pub async fn fetch_list(&self, list_id: &str, default_author: &str) -> Vec<NewPost> {
        let url = self.list_url(list_id);

        let bytes = match self.fetch_document(&url).await {
            Ok(FetchResult::Document(bytes)) => bytes,
            Ok(FetchResult::Redirected(location)) => {
                tracing::warn!(
                    "Feed for list {} redirected to {}; check feed_base_url",
                    list_id,
                    location.as_deref().unwrap_or("<no location>")
                );
                return Vec::new();
            }
            Err(e) => {
                tracing::error!("Failed to fetch feed for list {}: {}", list_id, e);
                return Vec::new();
            }
        };

        match parse_entries(&bytes, default_author) {
            Ok(posts) if posts.is_empty() => {
                tracing::warn!(
                    "Feed for list {} has no entries; the endpoint may have changed",
                    list_id
                );
                posts
            }
            Ok(posts) => {
                tracing::debug!("Fetched {} entries from list {}", posts.len(), list_id);
                posts
            }
            Err(e) => {
                tracing::error!("Failed to parse feed for list {}: {}", list_id, e);
                Vec::new()
            }
        }
    }

    /// Fetches several lists concurrently. Order of the result is unspecified.
    pub async fn fetch_lists(&self, list_ids: &[String], default_author: &str) -> Vec<NewPost> {
        let fetches: Vec<_> = list_ids
            .iter()
            .map(|list_id| self.fetch_list(list_id, default_author))
            .collect();
        let results: Vec<Vec<NewPost>> = stream::iter(fetches)
            .buffer_unordered(MAX_CONCURRENT_FETCHES)
            .collect()
            .await;

        results.into_iter().flatten().collect()
    }

    async fn fetch_document(&self, url: &Url) -> Result<FetchResult> {
        let response = self.client.get(url.clone()).send().await?;
        let status = response.status();

        if status.is_redirection() {
            let location = response
                .headers()
                .get(LOCATION)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            return Ok(FetchResult::Redirected(location));
        }

        if !status.is_success() {
            return Err(anyhow::anyhow!("HTTP {}", status).into());
        }

        Ok(FetchResult::Document(response.bytes().await?.to_vec()))
    }
}

/// Parses a syndication document into normalized posts. Entries with
/// neither an id nor a link are dropped.
pub fn parse_entries(bytes: &[u8], default_author: &str) -> Result<Vec<NewPost>> {
    let feed = parser::Builder::new()
        .id_generator(|links, _title, _uri| {
            links.first().map(|l| l.href.clone()).unwrap_or_default()
        })
        .build()
        .parse(bytes)?;

    let img_re = Regex::new(IMG_SRC_PATTERN).ok();

    Ok(feed
        .entries
        .into_iter()
        .filter_map(|entry| normalize_entry(entry, default_author, img_re.as_ref()))
        .collect())
}

fn normalize_entry(entry: Entry, default_author: &str, img_re: Option<&Regex>) -> Option<NewPost> {
    let post_url = entry
        .links
        .first()
        .map(|l| l.href.clone())
        .unwrap_or_default();

    let id = match entry.id.trim() {
        "" => post_url.clone(),
        id => id.to_string(),
    };
    if id.is_empty() {
        return None;
    }

    let author = entry
        .authors
        .iter()
        .map(author_handle)
        .find(|handle| !handle.is_empty())
        .unwrap_or_else(|| default_author.to_string());

    // Prefer the summary (RSS description), then the full content body
    let content = entry
        .summary
        .as_ref()
        .map(|s| s.content.clone())
        .or_else(|| entry.content.as_ref().and_then(|c| c.body.clone()))
        .unwrap_or_default();

    let content_text = entry
        .title
        .as_ref()
        .map(|t| t.content.trim().to_string())
        .filter(|t| !t.is_empty())
        .or_else(|| html_to_text(&content))
        .unwrap_or_default();

    let media_urls = collect_media(&entry, &content, img_re);

    Some(NewPost {
        id,
        author,
        content,
        content_text,
        media_urls,
        post_url,
        published_at: entry.published.or(entry.updated),
    })
}

/// feed-rs reads an RSS `<author>` element as `name: "author"` with the
/// element text in `email`; `dc:creator` and Atom authors land in `name`.
fn author_handle(person: &Person) -> String {
    let raw = match person.email.as_deref() {
        Some(text) if person.name == "author" => text,
        _ => person.name.as_str(),
    };
    normalize_handle(raw)
}

fn html_to_text(html: &str) -> Option<String> {
    if html.trim().is_empty() {
        return None;
    }
    let text = html2text::from_read(html.as_bytes(), 1000).ok()?;
    let cleaned = text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n");
    (!cleaned.is_empty()).then_some(cleaned)
}

/// Enclosure/media URLs first, then inline `<img>` sources; first occurrence wins.
fn collect_media(entry: &Entry, html: &str, img_re: Option<&Regex>) -> Vec<String> {
    let attached = entry
        .media
        .iter()
        .flat_map(|m| m.content.iter())
        .filter_map(|c| c.url.as_ref().map(|u| u.to_string()));

    let inline: Vec<String> = img_re
        .map(|re| {
            re.captures_iter(html)
                .filter_map(|cap| cap.get(1))
                .map(|m| m.as_str().replace("&amp;", "&"))
                .collect()
        })
        .unwrap_or_default();

    let mut urls: Vec<String> = Vec::new();
    for url in attached.chain(inline) {
        if !url.is_empty() && !urls.contains(&url) {
            urls.push(url);
        }
    }
    urls
}
