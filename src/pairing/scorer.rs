use crate::models::Article;

/// Each step of side distance adds this much contradiction, so the two
/// extremes (distance 4) contradict fully.
const CONTRADICTION_PER_STEP: f64 = 0.25;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BiasScore {
    pub eligible: bool,
    pub similarity: f64,
    pub contradiction: f64,
    /// Mean of similarity and contradiction when eligible, 0 otherwise.
    pub value: f64,
}

impl BiasScore {
    fn ineligible() -> Self {
        Self {
            eligible: false,
            similarity: 0.0,
            contradiction: 0.0,
            value: 0.0,
        }
    }
}

/// Decides whether two articles cover the same topic from opposing sides.
#[derive(Debug, Clone, Copy)]
pub struct BiasScorer {
    pub similarity_threshold: f64,
    pub contradiction_threshold: f64,
}

impl Default for BiasScorer {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.5,
            contradiction_threshold: 0.5,
        }
    }
}

impl BiasScorer {
    pub fn new(similarity_threshold: f64, contradiction_threshold: f64) -> Self {
        Self {
            similarity_threshold,
            contradiction_threshold,
        }
    }

    pub fn score(&self, main: &Article, candidate: &Article) -> BiasScore {
        if main.short_source() == candidate.short_source() {
            return BiasScore::ineligible();
        }
        let (Some(main_side), Some(candidate_side)) = (main.side, candidate.side) else {
            return BiasScore::ineligible();
        };

        let similarity = keyword_similarity(main, candidate);
        let contradiction = f64::from(main_side.distance(candidate_side)) * CONTRADICTION_PER_STEP;

        let eligible =
            similarity >= self.similarity_threshold && contradiction >= self.contradiction_threshold;
        BiasScore {
            eligible,
            similarity,
            contradiction,
            value: if eligible { (similarity + contradiction) / 2.0 } else { 0.0 },
        }
    }
}

/// Weighted keyword overlap in [0, 1].
///
/// Every keyword the larger set has over the smaller one costs
/// `1 / (2 * max)`; the remaining weight is spread over the smaller set's
/// keywords, and each shared keyword earns one share.
fn keyword_similarity(a: &Article, b: &Article) -> f64 {
    let (a, b) = (&a.keywords, &b.keywords);
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    let min_count = a.len().min(b.len()) as f64;
    let max_count = a.len().max(b.len()) as f64;
    let miss_weight = 1.0 / (2.0 * max_count);
    let match_weight = (1.0 - miss_weight * (max_count - min_count)) / min_count;

    a.intersection(b).count() as f64 * match_weight
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Side;

    fn article(source: &str, side: Option<Side>, keywords: &[&str]) -> Article {
        let host: String = source.chars().filter(char::is_ascii_alphanumeric).collect();
        Article::new(source, format!("https://{}.com/x", host.to_lowercase()))
            .with_keywords(keywords.iter().copied())
            .with_side(side)
    }

    #[test]
    fn test_opposite_sides_with_overlap() {
        let main = article("Left", Some(Side::LEFT), &["tax", "trump"]);
        let candidate = article("Right", Some(Side::RIGHT), &["tax", "trump", "mad"]);

        let score = BiasScorer::default().score(&main, &candidate);
        assert!(score.eligible);
        assert_eq!(score.contradiction, 1.0);
        assert!((score.similarity - 5.0 / 6.0).abs() < 1e-9);
        assert!((score.value - (1.0 + 5.0 / 6.0) / 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_score_is_symmetric() {
        let scorer = BiasScorer::default();
        let cases = [
            (
                article("A", Some(Side::LEFT), &["tax", "trump"]),
                article("B", Some(Side::RIGHT_CENTER), &["tax", "trump", "mad", "bill"]),
            ),
            (
                article("A", Some(Side::CENTER), &["senate"]),
                article("B", Some(Side::RIGHT), &["senate", "vote"]),
            ),
            (
                article("A", Some(Side::LEFT_CENTER), &["a", "b", "c"]),
                article("B", Some(Side::LEFT), &["d"]),
            ),
        ];
        for (a, b) in &cases {
            assert_eq!(scorer.score(a, b), scorer.score(b, a));
        }
    }

    #[test]
    fn test_identical_keywords_are_fully_similar() {
        let a = article("A", Some(Side::LEFT), &["climate", "summit"]);
        let b = article("B", Some(Side::CENTER), &["summit", "climate"]);
        let score = BiasScorer::default().score(&a, &b);
        assert_eq!(score.similarity, 1.0);
        assert_eq!(score.contradiction, 0.5);
        assert!(score.eligible);
    }

    #[test]
    fn test_thresholds() {
        let a = article("A", Some(Side::LEFT_CENTER), &["tax", "trump"]);
        let b = article("B", Some(Side::CENTER), &["tax", "trump"]);
        // One step apart is not opposing enough.
        let score = BiasScorer::default().score(&a, &b);
        assert!(!score.eligible);
        assert_eq!(score.value, 0.0);
        assert!(BiasScorer::new(0.5, 0.25).score(&a, &b).eligible);

        let c = article("C", Some(Side::RIGHT), &["tax", "budget", "house", "vote"]);
        // 1 shared out of 4: 1 * (1 - 1/8 * 2) / 2 = 0.375.
        let score = BiasScorer::default().score(&a, &c);
        assert!((score.similarity - 0.375).abs() < 1e-9);
        assert!(!score.eligible);
    }

    #[test]
    fn test_never_eligible() {
        let scorer = BiasScorer::default();
        let main = article("BBC - World", Some(Side::LEFT), &["tax"]);

        let same_source = article("BBC - Europe", Some(Side::RIGHT), &["tax"]);
        assert!(!scorer.score(&main, &same_source).eligible);

        let sideless = article("Fox", None, &["tax"]);
        assert!(!scorer.score(&main, &sideless).eligible);

        let no_keywords = article("Fox", Some(Side::RIGHT), &[]);
        assert!(!scorer.score(&main, &no_keywords).eligible);
    }
}
