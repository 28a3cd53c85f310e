use async_trait::async_trait;
use percent_encoding::percent_decode_str;
use scraper::{ElementRef, Html, Selector};
use serde::Serialize;

use crew_core::tools::{ArgSpec, ArgType, Tool, ToolArgs, ToolContext, ToolDescriptor, ToolError, ToolOutput};

use super::fetch_url::{browser_client, get_text, timeout_arg};

const DUCKDUCKGO_HTML_URL: &str = "https://duckduckgo.com/html/";

#[derive(Debug, PartialEq, Serialize)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

/// Keyless web search over DuckDuckGo's HTML endpoint.
pub struct WebSearchTool {
    client: reqwest::Client,
    endpoint: String,
}

impl Default for WebSearchTool {
    fn default() -> Self {
        Self::new()
    }
}

impl WebSearchTool {
    pub fn new() -> Self {
        Self::with_endpoint(DUCKDUCKGO_HTML_URL)
    }

    pub fn with_endpoint(endpoint: impl Into<String>) -> Self {
        Self {
            client: browser_client(),
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new("search_web", "Search the web (DuckDuckGo) and return titles, URLs and snippets")
            .arg(ArgSpec::required("query", ArgType::String, "Search query"))
            .arg(
                ArgSpec::optional("max_results", ArgType::Integer, "Maximum results (default 5)")
                    .with_default(5),
            )
            .arg(
                ArgSpec::optional("timeout", ArgType::Integer, "Request timeout in seconds (default 10)")
                    .with_default(10),
            )
    }

    async fn execute(&self, args: ToolArgs, _ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        let query = args.str("query")?;
        let max_results = usize::try_from(args.i64("max_results")?).unwrap_or(0);
        let timeout = timeout_arg(&args)?;

        let request = self
            .client
            .get(&self.endpoint)
            .query(&[("q", query), ("kl", "us-en")]);
        let body = get_text(request, timeout).await?;

        let hits = parse_results(&body, max_results);
        let value = serde_json::to_value(&hits)
            .map_err(|e| ToolError::Execution(format!("failed to encode results: {e}")))?;
        Ok(ToolOutput::json(value))
    }
}

fn parse_results(html: &str, max_results: usize) -> Vec<SearchHit> {
    let document = Html::parse_document(html);
    let (Ok(result_sel), Ok(link_sel), Ok(snippet_sel)) = (
        Selector::parse("div.result"),
        Selector::parse("a.result__a"),
        Selector::parse("a.result__snippet, div.result__snippet"),
    ) else {
        return Vec::new();
    };

    let mut hits = Vec::new();
    for result in document.select(&result_sel) {
        if hits.len() >= max_results {
            break;
        }
        let Some(link) = result.select(&link_sel).next() else {
            continue;
        };
        let href = link.value().attr("href").unwrap_or_default();
        hits.push(SearchHit {
            title: stripped_text(link),
            url: unwrap_redirect(href),
            snippet: result
                .select(&snippet_sel)
                .next()
                .map(stripped_text)
                .unwrap_or_default(),
        });
    }
    hits
}

/// Text nodes trimmed and concatenated without separators.
fn stripped_text(el: ElementRef<'_>) -> String {
    el.text().map(str::trim).filter(|t| !t.is_empty()).collect()
}

/// DuckDuckGo wraps targets as `/l/?uddg=<encoded>&rut=...`.
fn unwrap_redirect(href: &str) -> String {
    match href.rsplit_once("uddg=") {
        Some((_, encoded)) => {
            let encoded = encoded.split('&').next().unwrap_or_default();
            percent_decode_str(encoded).decode_utf8_lossy().into_owned()
        }
        None => href.to_string(),
    }
}
