//! Text cleanup applied before content is handed to a language model.

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::Html;

static URL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"https?://[^\s<>\x22'）」]+").expect("Invalid URL regex")
});

static WHITESPACE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[ \t]+").expect("Invalid whitespace regex"));

/// Remove every http(s) URL from `text`.
#[must_use]
pub fn remove_urls(text: &str) -> String {
    let stripped = URL_RE.replace_all(text, "");
    WHITESPACE_RE.replace_all(stripped.trim(), " ").into_owned()
}

/// Extract the visible text of an HTML fragment.
///
/// Text nodes are joined with a single space, mirroring how a reader sees
/// the rendered post.
#[must_use]
pub fn html_to_text(html: &str) -> String {
    let fragment = Html::parse_fragment(html);
    fragment
        .root_element()
        .text()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Clean a raw post body for classification: markup and URLs are dropped.
#[must_use]
pub fn clean_for_classifier(raw: &str) -> String {
    remove_urls(&html_to_text(raw))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remove_urls() {
        assert_eq!(
            remove_urls("buy now at https://spam.example.com/deal?x=1 today"),
            "buy now at today"
        );
        assert_eq!(remove_urls("no links here"), "no links here");
        assert_eq!(remove_urls("http://a.example"), "");
    }

    #[test]
    fn test_html_to_text() {
        assert_eq!(
            html_to_text("<p>Hello <strong>world</strong></p><p>Second</p>"),
            "Hello world Second"
        );
        assert_eq!(html_to_text("plain"), "plain");
        assert_eq!(html_to_text(""), "");
    }

    #[test]
    fn test_clean_for_classifier() {
        let raw = r#"<p>Check <a href="https://x.example">this</a> https://x.example now</p>"#;
        assert_eq!(clean_for_classifier(raw), "Check this now");
    }
}
