use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use feed_rs::parser;
use reqwest::header::{ETAG, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED, LOCATION};
use reqwest::{redirect, Client, StatusCode};
use url::Url;

use crate::error::{AppError, Result};

const MAX_REDIRECTS: usize = 5;

/// How the feed server answered a conditional fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedStatus {
    Ok,
    /// 410: the feed is dead.
    Gone,
    /// 401: the feed needs credentials.
    Unauthorized,
    /// 304: nothing new since the checkpoint.
    NotModified,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedEntry {
    pub id: String,
    pub link: Option<String>,
    pub title: Option<String>,
    pub summary: Option<String>,
    /// Entry body, used when the feed has no summary.
    pub description: Option<String>,
    pub published: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeedResponse {
    pub status: FeedStatus,
    /// Where the feed permanently moved to (301/308), if it did.
    pub moved_to: Option<String>,
    /// Modification time reported by the server.
    pub modified: Option<DateTime<Utc>>,
    pub etag: Option<String>,
    pub entries: Vec<FeedEntry>,
}

impl FeedResponse {
    pub fn with_status(status: FeedStatus) -> Self {
        Self {
            status,
            moved_to: None,
            modified: None,
            etag: None,
            entries: Vec::new(),
        }
    }
}

/// Fetches and parses a feed, conditionally on a previous checkpoint.
#[async_trait]
pub trait FeedSource: Send + Sync {
    async fn fetch(
        &self,
        link: &str,
        modified: Option<DateTime<Utc>>,
        etag: Option<&str>,
    ) -> Result<FeedResponse>;
}

pub struct HttpFeedSource {
    client: Client,
}

impl HttpFeedSource {
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .user_agent(user_agent)
            // Redirects are followed by hand to notice permanent moves.
            .redirect(redirect::Policy::none())
            .build()?;

        Ok(Self { client })
    }
}

#[async_trait]
impl FeedSource for HttpFeedSource {
    async fn fetch(
        &self,
        link: &str,
        modified: Option<DateTime<Utc>>,
        etag: Option<&str>,
    ) -> Result<FeedResponse> {
        let mut url = Url::parse(link)?;
        let mut moved_to = None;

        for _ in 0..=MAX_REDIRECTS {
            let mut request = self.client.get(url.clone());
            if let Some(modified) = modified {
                request = request.header(IF_MODIFIED_SINCE, http_date(modified));
            }
            if let Some(etag) = etag {
                request = request.header(IF_NONE_MATCH, etag);
            }

            let response = request.send().await?;
            let status = response.status();

            if status.is_redirection() && status != StatusCode::NOT_MODIFIED {
                let location = response
                    .headers()
                    .get(LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .ok_or_else(|| AppError::FetchStatus {
                        url: url.to_string(),
                        status: status.as_u16(),
                    })?;
                let next = url.join(location)?;
                if matches!(status, StatusCode::MOVED_PERMANENTLY | StatusCode::PERMANENT_REDIRECT) {
                    moved_to = Some(next.to_string());
                }
                tracing::debug!("Feed {} redirected ({}) to {}", url, status, next);
                url = next;
                continue;
            }

            let feed_status = match status {
                StatusCode::GONE => FeedStatus::Gone,
                StatusCode::UNAUTHORIZED => FeedStatus::Unauthorized,
                StatusCode::NOT_MODIFIED => FeedStatus::NotModified,
                s if s.is_success() => FeedStatus::Ok,
                s => {
                    return Err(AppError::FetchStatus {
                        url: url.to_string(),
                        status: s.as_u16(),
                    })
                }
            };
            if feed_status != FeedStatus::Ok {
                return Ok(FeedResponse {
                    moved_to,
                    ..FeedResponse::with_status(feed_status)
                });
            }

            let new_modified = response
                .headers()
                .get(LAST_MODIFIED)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_http_date);
            let new_etag = response
                .headers()
                .get(ETAG)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);

            let bytes = response.bytes().await?;
            let entries = parse_entries(&bytes)?;

            return Ok(FeedResponse {
                status: FeedStatus::Ok,
                moved_to,
                modified: new_modified,
                etag: new_etag,
                entries,
            });
        }

        Err(AppError::Other(anyhow::anyhow!(
            "Too many redirects while fetching {}",
            link
        )))
    }
}

/// Parses an RSS/Atom document into entries, in feed order.
pub fn parse_entries(bytes: &[u8]) -> Result<Vec<FeedEntry>> {
    let feed = parser::parse(bytes)?;

    let entries = feed
        .entries
        .into_iter()
        .map(|entry| FeedEntry {
            link: entry.links.first().map(|l| l.href.clone()),
            title: entry.title.map(|t| t.content),
            summary: entry.summary.map(|s| s.content),
            description: entry.content.and_then(|c| c.body),
            published: entry.published.or(entry.updated),
            id: entry.id,
        })
        .collect();

    Ok(entries)
}

fn http_date(dt: DateTime<Utc>) -> String {
    dt.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

fn parse_http_date(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(s.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
