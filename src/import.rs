use std::path::Path;

use serde::Deserialize;

use crate::error::{AppError, Result};
use crate::models::{normalize_site, FeedTarget, Side, Site};

#[derive(Debug, Deserialize)]
struct SitesFile {
    #[serde(default)]
    sites: Vec<SiteEntry>,
}

#[derive(Debug, Deserialize)]
struct SiteEntry {
    site: String,
    side: String,
    publisher: Option<String>,
    source: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TargetsFile {
    #[serde(default)]
    targets: Vec<TargetEntry>,
}

#[derive(Debug, Deserialize)]
struct TargetEntry {
    source_name: String,
    link: String,
    site: Option<String>,
    #[serde(default = "enabled_by_default")]
    enabled: bool,
    side: Option<String>,
}

fn enabled_by_default() -> bool {
    true
}

/// Reads `[[sites]]` tables. Unknown side labels reject the whole file.
pub fn parse_sites(content: &str) -> Result<Vec<Site>> {
    let file: SitesFile = toml::from_str(content)?;
    file.sites
        .into_iter()
        .map(|entry| {
            let site = normalize_site(&entry.site);
            if site.is_empty() {
                return Err(AppError::Config(format!("invalid site {:?}", entry.site)));
            }
            Ok(Site {
                site,
                side: entry.side.parse()?,
                publisher: entry.publisher,
                source: entry.source,
            })
        })
        .collect()
}

/// Reads `[[targets]]` tables. A target's site defaults to its link's domain.
pub fn parse_targets(content: &str) -> Result<Vec<FeedTarget>> {
    let file: TargetsFile = toml::from_str(content)?;
    file.targets
        .into_iter()
        .map(|entry| {
            url::Url::parse(&entry.link)?;
            let site = normalize_site(entry.site.as_deref().unwrap_or(&entry.link));
            let mut target = FeedTarget::new(entry.source_name, entry.link, site);
            target.enabled = entry.enabled;
            target.side = entry.side.as_deref().map(str::parse::<Side>).transpose()?;
            Ok(target)
        })
        .collect()
}

pub fn read_sites_file(path: &Path) -> Result<Vec<Site>> {
    parse_sites(&std::fs::read_to_string(path)?)
}

pub fn read_targets_file(path: &Path) -> Result<Vec<FeedTarget>> {
    parse_targets(&std::fs::read_to_string(path)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sites() {
        let sites = parse_sites(
            r#"
[[sites]]
site = "https://www.BBC.co.uk/news"
side = "Left Center"
source = "BBC"

[[sites]]
site = "foxnews.com"
side = "right"
publisher = "https://www.foxnews.com"
"#,
        )
        .unwrap();

        assert_eq!(sites.len(), 2);
        assert_eq!(sites[0].site, "bbc.co.uk");
        assert_eq!(sites[0].side, Side::LEFT_CENTER);
        assert_eq!(sites[0].source.as_deref(), Some("BBC"));
        assert_eq!(sites[1].side, Side::RIGHT);
        assert_eq!(sites[1].source, None);
    }

    #[test]
    fn test_unknown_side_label_is_rejected() {
        let err = parse_sites("[[sites]]\nsite = \"a.com\"\nside = \"far-left\"\n").unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }

    #[test]
    fn test_parse_targets() {
        let targets = parse_targets(
            r#"
[[targets]]
source_name = "BBC - World"
link = "https://feeds.bbci.co.uk/news/world/rss.xml"
site = "bbc.co.uk"

[[targets]]
source_name = "Fox News - Politics"
link = "https://moxie.foxnews.com/google-publisher/politics.xml"
enabled = false
side = "right"
"#,
        )
        .unwrap();

        assert_eq!(targets[0].site, "bbc.co.uk");
        assert!(targets[0].enabled);
        assert_eq!(targets[0].side, None);
        assert_eq!(targets[1].site, "moxie.foxnews.com");
        assert!(!targets[1].enabled);
        assert_eq!(targets[1].side, Some(Side::RIGHT));
    }

    #[test]
    fn test_target_needs_valid_link() {
        let err = parse_targets("[[targets]]\nsource_name = \"X\"\nlink = \"not a link\"\n").unwrap_err();
        assert!(matches!(err, AppError::Url(_)));
    }
}
