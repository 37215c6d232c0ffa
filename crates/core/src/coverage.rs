use fuzzy_matcher::FuzzyMatcher;
use fuzzy_matcher::skim::SkimMatcherV2;

const STOPWORDS: [&str; 16] = [
    "the", "and", "for", "with", "how", "what", "why", "your", "you", "are", "was", "that",
    "this", "from", "into", "about",
];

/// Extra characters a response word may carry beyond the keyword it matches
/// ("review" still matches "reviews" or "reviewing").
const MAX_SUFFIX: usize = 3;

/// Decides which expected points a free-text answer mentions.
///
/// Each point is broken into keywords; a point counts as covered when any of
/// its keywords fuzzy-matches a word of the answer of similar length.
pub struct PointMatcher {
    matcher: SkimMatcherV2,
}

impl Default for PointMatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl PointMatcher {
    pub fn new() -> Self {
        Self {
            matcher: SkimMatcherV2::default(),
        }
    }

    pub fn covered<'a>(&self, response: &str, points: &'a [String]) -> Vec<&'a String> {
        let words = tokenize(response);
        points
            .iter()
            .filter(|point| {
                keywords(point)
                    .iter()
                    .any(|keyword| self.matches_any(keyword, &words))
            })
            .collect()
    }

    /// Fraction of `points` mentioned in `response`; zero when there are no points.
    pub fn coverage(&self, response: &str, points: &[String]) -> f64 {
        if points.is_empty() {
            return 0.0;
        }
        self.covered(response, points).len() as f64 / points.len() as f64
    }

    fn matches_any(&self, keyword: &str, words: &[String]) -> bool {
        let len = keyword.chars().count();
        words.iter().any(|word| {
            let word_len = word.chars().count();
            word_len >= len
                && word_len <= len + MAX_SUFFIX
                && self.matcher.fuzzy_match(word, keyword).is_some()
        })
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn keywords(point: &str) -> Vec<String> {
    tokenize(point)
        .into_iter()
        .filter(|w| w.chars().count() >= 3 && !STOPWORDS.contains(&w.as_str()))
        .collect()
}

/// Counts how many of `markers` occur in the lowercased text.
pub fn count_markers(text: &str, markers: &[&str]) -> usize {
    let lowered = text.to_lowercase();
    markers.iter().filter(|m| lowered.contains(*m)).count()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn points(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_covered_points_tolerate_inflection() {
        let matcher = PointMatcher::new();
        let expected = points(&["Testing", "Code review", "Documentation"]);

        let covered = matcher.covered(
            "We rely on unit testing and careful code reviews for every change.",
            &expected,
        );

        assert_eq!(covered, vec![&expected[0], &expected[1]]);
    }

    #[test]
    fn test_coverage_of_empty_points_is_zero() {
        let matcher = PointMatcher::new();

        assert_eq!(matcher.coverage("anything at all", &[]), 0.0);
    }

    #[test]
    fn test_stopwords_do_not_count_as_mentions() {
        let matcher = PointMatcher::new();
        let expected = points(&["The outcome"]);

        assert_eq!(matcher.coverage("the the the", &expected), 0.0);
        assert_eq!(matcher.coverage("The outcome was great", &expected), 1.0);
    }

    #[test]
    fn test_count_markers_is_case_insensitive() {
        assert_eq!(count_markers("As a Result, we SHIPPED", &["result", "shipped", "task"]), 2);
    }
}
