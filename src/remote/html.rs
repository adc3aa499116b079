//! Title and visible text of fetched pages

use scraper::{Html, Selector};

/// Human-readable summary of an HTML page
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageSummary {
    /// The page title (from <title> tag)
    pub title: Option<String>,

    /// Visible body text with whitespace collapsed
    pub text: Option<String>,
}

/// Extracts the title and the visible text of an HTML document
///
/// Text inside `script`, `style` and `noscript` is skipped. Malformed markup
/// is parsed leniently, the way browsers do.
///
/// # Example
///
/// ```
/// use hashtag_crawler::remote::summarize_html;
///
/// let html = "<html><head><title>Test</title></head><body><p>Hello   world</p></body></html>";
/// let summary = summarize_html(html);
/// assert_eq!(summary.title.as_deref(), Some("Test"));
/// assert_eq!(summary.text.as_deref(), Some("Hello world"));
/// ```
pub fn summarize_html(html: &str) -> PageSummary {
    let document = Html::parse_document(html);

    PageSummary {
        title: extract_title(&document),
        text: extract_text(&document),
    }
}

fn extract_title(document: &Html) -> Option<String> {
    let title_selector = Selector::parse("title").ok()?;

    document
        .select(&title_selector)
        .next()
        .map(|element| element.text().collect::<String>().trim().to_string())
        .filter(|s| !s.is_empty())
}

fn extract_text(document: &Html) -> Option<String> {
    let body_selector = Selector::parse("body").ok()?;
    let body = document.select(&body_selector).next()?;

    let mut words = Vec::new();
    for node in body.descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let hidden = node.ancestors().any(|ancestor| {
            ancestor
                .value()
                .as_element()
                .is_some_and(|e| matches!(e.name(), "script" | "style" | "noscript"))
        });
        if !hidden {
            words.extend(text.split_whitespace());
        }
    }

    if words.is_empty() {
        None
    } else {
        Some(words.join(" "))
    }
}
