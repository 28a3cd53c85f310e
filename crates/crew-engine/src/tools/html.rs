//! Visible-text extraction for fetched pages.

use scraper::{ElementRef, Html, Node, Selector};

/// Elements dropped along with everything inside them.
const REMOVED_TAGS: &[&str] = &[
    "script", "style", "noscript", "header", "footer", "nav", "aside", "form", "iframe",
];

/// Preferred content containers, in order.
const CONTENT_TAGS: &[&str] = &["main", "article", "body"];

/// Cleaned visible text of `html`: trimmed, non-empty lines joined with `\n`.
pub fn extract_text(html: &str) -> String {
    let document = Html::parse_document(html);
    let Some(root) = content_root(&document) else {
        return String::new();
    };

    let mut pieces: Vec<&str> = Vec::new();
    let mut stack = vec![*root];
    while let Some(node) = stack.pop() {
        match node.value() {
            Node::Text(text) => {
                pieces.push(text);
                continue;
            }
            Node::Element(el) if REMOVED_TAGS.contains(&el.name()) => continue,
            _ => {}
        }
        let children: Vec<_> = node.children().collect();
        stack.extend(children.into_iter().rev());
    }

    pieces
        .join("\n")
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn content_root(document: &Html) -> Option<ElementRef<'_>> {
    CONTENT_TAGS.iter().find_map(|tag| {
        let selector = Selector::parse(tag).ok()?;
        document.select(&selector).find(|el| !inside_removed(el))
    })
}

fn inside_removed(el: &ElementRef<'_>) -> bool {
    el.ancestors()
        .filter_map(ElementRef::wrap)
        .any(|a| REMOVED_TAGS.contains(&a.value().name()))
}
