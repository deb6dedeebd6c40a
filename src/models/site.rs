use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::AppError;

/// Editorial leaning, from strongly left (-2) to strongly right (2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i8", into = "i8")]
pub struct Side(i8);

impl Side {
    pub const LEFT: Side = Side(-2);
    pub const LEFT_CENTER: Side = Side(-1);
    pub const CENTER: Side = Side(0);
    pub const RIGHT_CENTER: Side = Side(1);
    pub const RIGHT: Side = Side(2);

    const LABELS: [(&'static str, Side); 5] = [
        ("left", Side::LEFT),
        ("left-center", Side::LEFT_CENTER),
        ("center", Side::CENTER),
        ("right-center", Side::RIGHT_CENTER),
        ("right", Side::RIGHT),
    ];

    pub fn new(value: i8) -> Option<Self> {
        (-2..=2).contains(&value).then_some(Side(value))
    }

    pub fn value(self) -> i8 {
        self.0
    }

    pub fn label(self) -> &'static str {
        Self::LABELS
            .iter()
            .find(|(_, side)| *side == self)
            .map(|(label, _)| *label)
            .unwrap_or("center")
    }

    /// Absolute distance between two sides, in steps (0..=4).
    pub fn distance(self, other: Side) -> u8 {
        (self.0 - other.0).unsigned_abs()
    }
}

impl TryFrom<i8> for Side {
    type Error = String;

    fn try_from(value: i8) -> Result<Self, Self::Error> {
        Side::new(value).ok_or_else(|| format!("side {} is outside -2..=2", value))
    }
}

impl From<Side> for i8 {
    fn from(side: Side) -> Self {
        side.0
    }
}

impl FromStr for Side {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase().replace([' ', '_'], "-");
        Self::LABELS
            .iter()
            .find(|(label, _)| *label == wanted)
            .map(|(_, side)| *side)
            .ok_or_else(|| AppError::Config(format!("unknown side label {:?}", s)))
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A whitelisted news site and the side it leans to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Site {
    pub site: String,
    pub side: Side,
    pub publisher: Option<String>,
    pub source: Option<String>,
}

/// Returns the bare domain of a URL or host: lower-cased, without `www.`.
pub fn normalize_site(url_or_domain: &str) -> String {
    let trimmed = url_or_domain.trim();
    let host = Url::parse(trimmed)
        .ok()
        .and_then(|url| url.host_str().map(str::to_string))
        .unwrap_or_else(|| {
            // Bare domains like "bbc.co.uk/news" don't parse as URLs.
            trimmed
                .split('/')
                .next()
                .unwrap_or_default()
                .split(':')
                .next()
                .unwrap_or_default()
                .to_string()
        });
    let host = host.to_lowercase();
    host.strip_prefix("www.").unwrap_or(&host).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_side_labels() {
        assert_eq!("left".parse::<Side>().unwrap(), Side::LEFT);
        assert_eq!("Right Center".parse::<Side>().unwrap(), Side::RIGHT_CENTER);
        assert_eq!("left_center".parse::<Side>().unwrap(), Side::LEFT_CENTER);
        assert!("far-right".parse::<Side>().is_err());
        assert_eq!(Side::CENTER.to_string(), "center");
    }

    #[test]
    fn test_side_bounds() {
        assert_eq!(Side::new(2), Some(Side::RIGHT));
        assert_eq!(Side::new(3), None);
        assert_eq!(Side::new(-3), None);
        assert_eq!(Side::LEFT.distance(Side::RIGHT), 4);
        assert_eq!(Side::RIGHT.distance(Side::LEFT), 4);
    }

    #[test]
    fn test_normalize_site() {
        assert_eq!(normalize_site("https://www.BBC.co.uk/news/world"), "bbc.co.uk");
        assert_eq!(normalize_site("http://edition.cnn.com:8080/x"), "edition.cnn.com");
        assert_eq!(normalize_site("www.foxnews.com"), "foxnews.com");
        assert_eq!(normalize_site("nytimes.com/section"), "nytimes.com");
    }
}
