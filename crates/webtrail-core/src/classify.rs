//! URL → content-type classification.
//!
//! Categories are evaluated in the fixed priority order of
//! [`Category::ALL`]; the first category with a matching pattern wins and
//! anything unmatched is [`Category::General`].

use std::sync::LazyLock;

use regex::RegexSet;
use url::Url;

use crate::models::Category;

/// Patterns per category, matched case-insensitively against the full URL.
const RULES: &[(Category, &[&str])] = &[
    (
        Category::Email,
        &[
            r"^https?://mail\.google\.com/",
            r"^https?://outlook\.(live|office|office365)\.com/mail",
            r"^https?://mail\.yahoo\.com/",
            r"^https?://(mail\.)?proton\.me/",
            r"^https?://mail\.protonmail\.com/",
            r"^https?://(www\.)?fastmail\.com/mail",
            r"^https?://app\.hey\.com/",
        ],
    ),
    (
        Category::Chat,
        &[
            r"^https?://([a-z0-9-]+\.)*slack\.com/(client|archives|messages)/",
            r"^https?://(www\.)?discord\.com/channels/",
            r"^https?://web\.whatsapp\.com/",
            r"^https?://web\.telegram\.org/",
            r"^https?://(www\.)?messenger\.com/",
            r"^https?://teams\.microsoft\.com/",
            r"^https?://chat\.google\.com/",
        ],
    ),
    (
        Category::Document,
        &[
            r"^https?://docs\.google\.com/",
            r"^https?://drive\.google\.com/",
            r"^https?://(www\.)?notion\.so/",
            r"^https?://[a-z0-9-]+\.notion\.site/",
            r"^https?://[a-z0-9-]+\.atlassian\.net/wiki/",
            r"^https?://(www\.)?dropbox\.com/",
            r"^https?://[a-z0-9-]+\.sharepoint\.com/",
            r"^https?://(www\.)?figma\.com/(file|design)/",
            r"^https?://(www\.)?overleaf\.com/project/",
            r"\.pdf([?#]|$)",
        ],
    ),
    (
        Category::Social,
        &[
            r"^https?://(www\.|mobile\.)?(twitter|x)\.com/",
            r"^https?://(www\.)?linkedin\.com/",
            r"^https?://(www\.|m\.)?facebook\.com/",
            r"^https?://(www\.|old\.)?reddit\.com/",
            r"^https?://(www\.)?instagram\.com/",
            r"^https?://(www\.)?threads\.net/",
            r"^https?://bsky\.app/",
            r"^https?://(www\.)?mastodon\.[a-z]+/",
            r"^https?://news\.ycombinator\.com/item",
        ],
    ),
    (
        Category::Meeting,
        &[
            r"^https?://meet\.google\.com/",
            r"^https?://([a-z0-9-]+\.)?zoom\.us/(j|wc|my|rec)/",
            r"^https?://[a-z0-9-]+\.webex\.com/",
            r"^https?://calendar\.google\.com/",
            r"^https?://(www\.)?calendly\.com/",
            r"^https?://app\.gather\.town/",
        ],
    ),
    (
        Category::Article,
        &[
            r"^https?://([a-z0-9-]+\.)?medium\.com/",
            r"^https?://[a-z0-9-]+\.substack\.com/",
            r"^https?://([a-z]+\.)?wikipedia\.org/wiki/",
            r"^https?://(www\.)?(nytimes|theguardian|bbc|washingtonpost|reuters|bloomberg|economist|theatlantic|wired|arstechnica)\.(com|co\.uk)/",
            r"^https?://news\.[a-z0-9.-]+/",
            r"^https?://dev\.to/",
            r"/(blog|blogs|article|articles|post|posts|news)/",
        ],
    ),
    (
        Category::Search,
        &[
            r"^https?://(www\.)?google\.[a-z.]+/search",
            r"^https?://(www\.)?bing\.com/search",
            r"^https?://(html\.)?duckduckgo\.com/.*[?&]q=",
            r"^https?://search\.yahoo\.com/search",
            r"^https?://(www\.)?kagi\.com/search",
            r"^https?://search\.brave\.com/search",
            r"^https?://(www\.)?perplexity\.ai/search",
            r"/search\?(.*&)?(q|query)=",
        ],
    ),
];

struct CompiledRule {
    category: Category,
    set: RegexSet,
}

static COMPILED: LazyLock<Vec<CompiledRule>> = LazyLock::new(|| {
    RULES
        .iter()
        .filter_map(|(category, patterns)| {
            let anchored: Vec<String> = patterns.iter().map(|p| format!("(?i){}", p)).collect();
            match RegexSet::new(&anchored) {
                Ok(set) => Some(CompiledRule {
                    category: *category,
                    set,
                }),
                Err(e) => {
                    tracing::error!(category = %category, error = %e, "classifier rule failed to compile");
                    None
                }
            }
        })
        .collect()
});

/// Classifies origin URLs into content-type categories.
///
/// Pure and infallible; an unmatched URL is [`Category::General`].
#[derive(Debug, Clone, Copy, Default)]
pub struct Classifier;

impl Classifier {
    pub fn new() -> Self {
        Classifier
    }

    pub fn classify(&self, url: &str) -> Category {
        let url = url.trim();
        COMPILED
            .iter()
            .find(|rule| rule.set.is_match(url))
            .map(|rule| rule.category)
            .unwrap_or(Category::General)
    }
}

/// Returns the first non-empty, percent-decoded value of any of `keys` in
/// the URL query string.
pub fn query_param(url: &str, keys: &[&str]) -> Option<String> {
    let parsed = Url::parse(url.trim()).ok()?;
    let value = parsed
        .query_pairs()
        .find(|(k, v)| keys.contains(&&**k) && !v.is_empty())
        .map(|(_, v)| v.into_owned());
    value
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(url: &str) -> Category {
        Classifier::new().classify(url)
    }

    #[test]
    fn test_each_category() {
        assert_eq!(classify("https://mail.google.com/mail/u/0/#inbox"), Category::Email);
        assert_eq!(classify("https://app.slack.com/client/T1/C1"), Category::Chat);
        assert_eq!(classify("https://docs.google.com/document/d/abc/edit"), Category::Document);
        assert_eq!(classify("https://x.com/someone/status/1"), Category::Social);
        assert_eq!(classify("https://meet.google.com/abc-defg-hij"), Category::Meeting);
        assert_eq!(classify("https://en.wikipedia.org/wiki/Rust"), Category::Article);
        assert_eq!(classify("https://www.google.com/search?q=rust"), Category::Search);
        assert_eq!(classify("https://example.com/"), Category::General);
    }

    #[test]
    fn test_priority_first_match_wins() {
        // Matches both an article host and a search path.
        assert_eq!(classify("https://medium.com/search?q=rust"), Category::Article);
        // A blog path on a document host stays a document.
        assert_eq!(classify("https://www.notion.so/blog/post"), Category::Document);
    }

    #[test]
    fn test_case_insensitive() {
        assert_eq!(classify("HTTPS://APP.SLACK.COM/CLIENT/T1"), Category::Chat);
    }

    #[test]
    fn test_never_fails_on_garbage() {
        assert_eq!(classify(""), Category::General);
        assert_eq!(classify("::::"), Category::General);
    }

    #[test]
    fn test_query_param() {
        assert_eq!(
            query_param("https://www.google.com/search?client=x&q=rust+lang%21", &["q"]).as_deref(),
            Some("rust lang!")
        );
        assert_eq!(query_param("https://example.com/", &["q"]), None);
        assert_eq!(query_param("https://example.com/?q=", &["q"]), None);
        assert_eq!(
            query_param("https://search.yahoo.com/search?p=caf%C3%A9#top", &["q", "p"]).as_deref(),
            Some("café")
        );
        assert_eq!(query_param("not a url?q=x", &["q"]), None);
    }
}
