use super::traits::UrlMatcher;
use crate::model::TrackedSite;
use regex::{Regex, RegexBuilder};
use tracing::debug;
use url::Url;

fn build_regex(pattern: &str) -> Result<Regex, regex::Error> {
    RegexBuilder::new(pattern).case_insensitive(true).build()
}

/// Why `pattern` cannot be used as a site regex, if it cannot.
pub fn regex_error(pattern: &str) -> Option<String> {
    build_regex(pattern).err().map(|e| e.to_string())
}

// Invalid patterns are reported at warn when a site is added or imported.
fn compile_pattern(pattern: &str) -> Option<Regex> {
    match build_regex(pattern) {
        Ok(regex) => Some(regex),
        Err(e) => {
            debug!(pattern = %pattern, "Skipping invalid site regex: {}", e);
            None
        }
    }
}

// `lowered_pattern` must already be lowercase.
fn substring_match(url: &str, lowered_pattern: &str) -> bool {
    let Ok(parsed) = Url::parse(url) else {
        return false;
    };
    let host = parsed.host_str().unwrap_or_default().to_lowercase();
    host.contains(lowered_pattern) || url.to_lowercase().contains(lowered_pattern)
}

enum CompiledPattern {
    Substring(String),
    Regex(Regex),
    Never,
}

/// Tracked sites with their patterns compiled once per navigation batch.
pub struct PatternMatcher {
    entries: Vec<(String, CompiledPattern)>,
}

impl PatternMatcher {
    pub fn new(sites: &[TrackedSite]) -> Self {
        let entries = sites
            .iter()
            .map(|site| {
                let compiled = if site.pattern.is_empty() {
                    CompiledPattern::Never
                } else if site.is_regex {
                    compile_pattern(&site.pattern)
                        .map(CompiledPattern::Regex)
                        .unwrap_or(CompiledPattern::Never)
                } else {
                    CompiledPattern::Substring(site.pattern.to_lowercase())
                };
                (site.id.clone(), compiled)
            })
            .collect();
        Self { entries }
    }
}

impl UrlMatcher for PatternMatcher {
    fn matching_sites(&self, url: &str) -> Vec<String> {
        if url.is_empty() {
            return Vec::new();
        }
        self.entries
            .iter()
            .filter(|(_, pattern)| match pattern {
                CompiledPattern::Substring(p) => substring_match(url, p),
                CompiledPattern::Regex(r) => r.is_match(url),
                CompiledPattern::Never => false,
            })
            .map(|(id, _)| id.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    /// Plain patterns match when either the hostname or the full URL contains
    /// the pattern; regex patterns are tested against the whole URL.
    fn url_matches(url: &str, pattern: &str, is_regex: bool) -> bool {
        let mut site = TrackedSite::new("s", "s", pattern, Utc::now());
        site.is_regex = is_regex;
        !PatternMatcher::new(&[site]).matching_sites(url).is_empty()
    }

    #[test]
    fn test_plain_pattern_matches_host_and_path() {
        assert!(url_matches("https://www.YouTube.com/watch?v=1", "youtube.com", false));
        assert!(url_matches("https://m.youtube.com/", "YOUTUBE", false));
        // Path and query substrings match as well
        assert!(url_matches("https://example.com/youtube.com/x", "youtube.com", false));
        assert!(url_matches("https://search.example/?q=netflix", "netflix", false));
        assert!(!url_matches("https://vimeo.com/", "youtube.com", false));
    }

    #[test]
    fn test_malformed_or_empty_never_match() {
        assert!(!url_matches("not a url youtube.com", "youtube.com", false));
        assert!(!url_matches("", "youtube.com", false));
        assert!(!url_matches("https://youtube.com", "", false));
        assert!(!url_matches("https://youtube.com", "", true));
    }

    #[test]
    fn test_regex_pattern() {
        assert!(url_matches("https://www.reddit.com/r/rust", r"reddit\.com/r/", true));
        assert!(url_matches("https://WWW.REDDIT.COM/r/rust", r"reddit\.com/r/", true));
        assert!(!url_matches("https://www.reddit.com/", r"reddit\.com/r/", true));
        // Regex tests the raw string, no URL parsing required
        assert!(url_matches("reddit.com/r/x", r"reddit\.com/r/", true));
    }

    #[test]
    fn test_invalid_regex_never_matches() {
        assert!(!url_matches("https://example.com/(", "(", true));
        assert!(regex_error("(").is_some());
        assert_eq!(regex_error(r"reddit\.com"), None);
    }

    #[test]
    fn test_pattern_matcher_lists_all_matches() {
        let now = Utc::now();
        let mut regex_site = TrackedSite::new("rx", "Reddit", r"reddit\.com", now);
        regex_site.is_regex = true;
        let mut broken = TrackedSite::new("bad", "Broken", "[", now);
        broken.is_regex = true;
        let sites = vec![
            TrackedSite::new("yt", "YouTube", "youtube.com", now),
            TrackedSite::new("tube", "Tube", "tube", now),
            regex_site,
            broken,
            TrackedSite::new("empty", "Empty", "", now),
        ];

        let matcher = PatternMatcher::new(&sites);
        assert_eq!(
            matcher.matching_sites("https://youtube.com/watch"),
            vec!["yt".to_string(), "tube".to_string()]
        );
        assert_eq!(
            matcher.matching_sites("https://old.reddit.com/"),
            vec!["rx".to_string()]
        );
        assert!(matcher.matching_sites("").is_empty());
        assert!(matcher.matching_sites("https://[/").is_empty());
    }
}
