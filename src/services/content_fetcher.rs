use std::collections::HashMap;
use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDate};
use regex::Regex;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT_LANGUAGE};
use reqwest::Client;
use scraper::{Html, Selector};

use crate::error::{AppError, Result};

const MAX_DERIVED_KEYWORDS: usize = 10;

static WORD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Za-z][A-Za-z'-]{3,}").expect("valid regex"));

const STOPWORDS: &[&str] = &[
    "about", "after", "again", "against", "also", "among", "because", "been", "before",
    "being", "between", "both", "could", "does", "doing", "down", "during", "each", "even",
    "from", "further", "have", "having", "here", "into", "just", "like", "more", "most",
    "much", "must", "only", "other", "over", "said", "same", "says", "should", "since",
    "some", "such", "than", "that", "their", "them", "then", "there", "these", "they",
    "this", "those", "through", "under", "until", "very", "were", "what", "when", "where",
    "which", "while", "will", "with", "would", "year", "years", "your",
];

/// What a full-text extraction yields for one article page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractedArticle {
    /// Final URL of the page, after redirects.
    pub url: String,
    pub title: Option<String>,
    pub summary: Option<String>,
    pub text: String,
    pub authors: Vec<String>,
    pub publish_date: Option<DateTime<FixedOffset>>,
    pub top_image: Option<String>,
    pub keywords: Vec<String>,
}

/// Retrieves an article page and extracts its content.
#[async_trait]
pub trait ArticleExtractor: Send + Sync {
    /// Fails with `NotRetrievable` when the page can't be fetched.
    async fn extract(&self, link: &str) -> Result<ExtractedArticle>;
}

pub struct HttpArticleExtractor {
    client: Client,
}

impl HttpArticleExtractor {
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.8"));

        let client = Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .default_headers(headers)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ArticleExtractor for HttpArticleExtractor {
    async fn extract(&self, link: &str) -> Result<ExtractedArticle> {
        let response = self.client.get(link).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(AppError::NotRetrievable(format!(
                "HTTP {} for {}",
                status.as_u16(),
                link
            )));
        }

        let final_url = response.url().to_string();
        let html = response.text().await?;
        Ok(extract_from_html(&html, &final_url))
    }
}

/// Extracts article fields from a page's HTML.
pub fn extract_from_html(html: &str, url: &str) -> ExtractedArticle {
    let document = Html::parse_document(html);

    let title = meta_content(&document, &["meta[property='og:title']", "meta[name='twitter:title']"])
        .into_iter()
        .next()
        .or_else(|| first_text(&document, "title"));
    let summary = meta_content(
        &document,
        &["meta[property='og:description']", "meta[name='description']"],
    )
    .into_iter()
    .next();

    let mut authors = Vec::new();
    for author in meta_content(&document, &["meta[name='author']", "meta[property='article:author']"]) {
        // Profile URLs are no names.
        if !author.starts_with("http") && !authors.contains(&author) {
            authors.push(author);
        }
    }

    let publish_date = meta_content(
        &document,
        &[
            "meta[property='article:published_time']",
            "meta[name='pubdate']",
            "meta[name='date']",
            "meta[itemprop='datePublished']",
        ],
    )
    .into_iter()
    .chain(attr_values(&document, "time[datetime]", "datetime"))
    .find_map(|raw| parse_publish_date(&raw));

    let top_image = meta_content(&document, &["meta[property='og:image']", "meta[name='twitter:image']"])
        .into_iter()
        .next();

    let text = body_text(&document).unwrap_or_else(|| fallback_text(html));

    let declared: Vec<String> = meta_content(&document, &["meta[name='news_keywords']", "meta[name='keywords']"])
        .iter()
        .flat_map(|raw| raw.split(','))
        .map(|k| k.trim().to_lowercase())
        .filter(|k| !k.is_empty())
        .collect();
    let keywords = if declared.is_empty() {
        derive_keywords(&text, MAX_DERIVED_KEYWORDS)
    } else {
        declared
    };

    ExtractedArticle {
        url: url.to_string(),
        title,
        summary,
        text,
        authors,
        publish_date,
        top_image,
        keywords,
    }
}

/// Text content of an HTML fragment, trimmed.
pub fn strip_html(html: &str) -> String {
    let fragment = Html::parse_fragment(html);
    let text: String = fragment.root_element().text().collect();
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Most frequent meaningful words of `text`, most frequent first.
pub fn derive_keywords(text: &str, limit: usize) -> Vec<String> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for word in WORD_RE.find_iter(text) {
        let word = word.as_str().trim_matches(|c| c == '\'' || c == '-').to_lowercase();
        if word.len() < 4 || STOPWORDS.contains(&word.as_str()) {
            continue;
        }
        *counts.entry(word).or_default() += 1;
    }

    let mut ranked: Vec<(String, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked.into_iter().take(limit).map(|(word, _)| word).collect()
}

fn selector(css: &str) -> Option<Selector> {
    Selector::parse(css).ok()
}

fn meta_content(document: &Html, selectors: &[&str]) -> Vec<String> {
    selectors
        .iter()
        .filter_map(|css| selector(css))
        .flat_map(|sel| {
            document
                .select(&sel)
                .filter_map(|el| el.value().attr("content"))
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty())
                .collect::<Vec<_>>()
        })
        .collect()
}

fn attr_values(document: &Html, css: &str, attr: &str) -> Vec<String> {
    let Some(sel) = selector(css) else {
        return Vec::new();
    };
    document
        .select(&sel)
        .filter_map(|el| el.value().attr(attr))
        .map(str::to_string)
        .collect()
}

fn first_text(document: &Html, css: &str) -> Option<String> {
    let sel = selector(css)?;
    let text = document
        .select(&sel)
        .next()?
        .text()
        .collect::<String>()
        .trim()
        .to_string();
    (!text.is_empty()).then_some(text)
}

/// Paragraphs of the `<article>` element, or of the whole page.
fn body_text(document: &Html) -> Option<String> {
    for css in ["article p", "p"] {
        let Some(sel) = selector(css) else {
            continue;
        };
        let paragraphs: Vec<String> = document
            .select(&sel)
            .map(|p| p.text().collect::<String>().split_whitespace().collect::<Vec<_>>().join(" "))
            .filter(|p| p.len() > 40)
            .collect();
        if !paragraphs.is_empty() {
            return Some(paragraphs.join("\n\n"));
        }
    }
    None
}

/// Plain-text rendering of the page for layouts without paragraphs.
fn fallback_text(html: &str) -> String {
    let text = match html2text::from_read(html.as_bytes(), 120) {
        Ok(t) => t,
        Err(e) => {
            tracing::debug!("Failed to convert HTML to text: {}", e);
            return String::new();
        }
    };

    text.lines()
        .map(|l| l.trim())
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn parse_publish_date(raw: &str) -> Option<DateTime<FixedOffset>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt);
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(raw) {
        return Some(dt);
    }
    // Date only, taken as midnight UTC.
    let date = NaiveDate::parse_from_str(raw.get(..10)?, "%Y-%m-%d").ok()?;
    Some(date.and_hms_opt(0, 0, 0)?.and_utc().fixed_offset())
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"<!DOCTYPE html>
<html>
<head>
  <title>Fallback title</title>
  <meta property="og:title" content="Senate passes tax bill">
  <meta name="description" content="The bill now heads to the House.">
  <meta name="author" content="Jane Doe">
  <meta property="article:author" content="https://site.com/staff/jane">
  <meta property="article:published_time" content="2024-05-02T09:30:00+02:00">
  <meta property="og:image" content="https://site.com/img/tax.jpg">
  <meta name="keywords" content="Tax, Senate , ,Congress">
</head>
<body>
  <nav><p>Menu</p></nav>
  <article>
    <p>The Senate passed the sweeping tax bill late on Wednesday after a long debate.</p>
    <p>Lawmakers in the House are expected to take up the measure next week, aides said.</p>
  </article>
</body>
</html>"#;

    #[test]
    fn test_extract_from_html() {
        let extracted = extract_from_html(PAGE, "https://site.com/tax");
        assert_eq!(extracted.url, "https://site.com/tax");
        assert_eq!(extracted.title.as_deref(), Some("Senate passes tax bill"));
        assert_eq!(extracted.summary.as_deref(), Some("The bill now heads to the House."));
        assert_eq!(extracted.authors, vec!["Jane Doe"]);
        assert_eq!(extracted.top_image.as_deref(), Some("https://site.com/img/tax.jpg"));
        assert_eq!(extracted.keywords, vec!["tax", "senate", "congress"]);
        assert!(extracted.text.starts_with("The Senate passed"));
        assert!(!extracted.text.contains("Menu"));

        let published = extracted.publish_date.unwrap();
        assert_eq!(published.offset().local_minus_utc(), 2 * 3600);
    }

    #[test]
    fn test_keywords_derived_from_text() {
        let html = "<html><body><p>Climate summit talks stall as climate negotiators argue over climate finance and summit deadlines.</p></body></html>";
        let extracted = extract_from_html(html, "https://site.com/climate");
        assert_eq!(extracted.keywords[0], "climate");
        assert_eq!(extracted.keywords[1], "summit");
        assert!(!extracted.keywords.contains(&"over".to_string()));
        assert_eq!(extracted.title, None);
    }

    #[test]
    fn test_derive_keywords_ranking_and_limit() {
        let text = "Voters' turnout rose. Turnout records fell; voters cheered the record-breaking turnout.";
        assert_eq!(derive_keywords(text, 2), vec!["turnout", "voters"]);
        assert!(derive_keywords("a be it on", 5).is_empty());
    }

    #[test]
    fn test_strip_html() {
        assert_eq!(strip_html("<p>Short <b>summary</b>\n here</p>"), "Short summary here");
        assert_eq!(strip_html("plain"), "plain");
    }

    #[test]
    fn test_parse_publish_date_formats() {
        assert!(parse_publish_date("2024-05-02T09:30:00Z").is_some());
        assert!(parse_publish_date("Thu, 02 May 2024 09:30:00 +0000").is_some());
        let date_only = parse_publish_date("2024-05-02").unwrap();
        assert_eq!(date_only.to_rfc3339(), "2024-05-02T00:00:00+00:00");
        assert!(parse_publish_date("yesterday").is_none());
    }
}
