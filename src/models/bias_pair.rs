use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Article;

/// Stored link between two articles covering the same topic from opposing sides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BiasPair {
    pub id: i64,
    pub left: i64,
    pub right: i64,
    pub score: f64,
    pub published: Option<DateTime<Utc>>,
    pub keywords: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewBiasPair {
    pub left: i64,
    pub right: i64,
    pub score: f64,
    pub published: Option<DateTime<Utc>>,
    pub keywords: BTreeSet<String>,
}

impl NewBiasPair {
    /// Orders the two saved articles by side (lower side on the left) and
    /// derives the pair's publish date and keywords from them.
    ///
    /// Returns `None` when either article has no storage identity.
    pub fn between(a: &Article, b: &Article, score: f64) -> Option<Self> {
        let (left, right) = if a.side <= b.side { (a, b) } else { (b, a) };
        let published = match (left.published, right.published) {
            (Some(l), Some(r)) => Some(l.max(r)),
            (l, r) => l.or(r),
        };
        let keywords = left.keywords.union(&right.keywords).cloned().collect();

        Some(Self {
            left: left.id?,
            right: right.id?,
            score,
            published,
            keywords,
        })
    }
}
