use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crew_core::tools::{ArgSpec, ArgType, Tool, ToolArgs, ToolContext, ToolDescriptor, ToolError, ToolOutput};

use super::html::extract_text;

pub(crate) const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
    AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

pub(crate) fn browser_client() -> reqwest::Client {
    reqwest::Client::builder()
        .user_agent(BROWSER_USER_AGENT)
        .build()
        .unwrap_or_default()
}

pub(crate) fn timeout_arg(args: &ToolArgs) -> Result<Duration, ToolError> {
    let secs = args.i64("timeout")?;
    if secs < 1 {
        return Err(ToolError::Validation(format!("timeout must be >= 1, got {secs}")));
    }
    Ok(Duration::from_secs(secs.unsigned_abs()))
}

pub(crate) fn request_error(err: reqwest::Error, timeout: Duration) -> ToolError {
    if err.is_timeout() {
        ToolError::Timeout(timeout)
    } else {
        ToolError::Network(err.to_string())
    }
}

/// GET `url` and return the body, mapping HTTP status failures to `Network`.
pub(crate) async fn get_text(
    request: reqwest::RequestBuilder,
    timeout: Duration,
) -> Result<String, ToolError> {
    let response = request
        .timeout(timeout)
        .send()
        .await
        .map_err(|e| request_error(e, timeout))?;
    let status = response.status();
    if !status.is_success() {
        return Err(ToolError::Network(format!("HTTP {status}")));
    }
    response.text().await.map_err(|e| request_error(e, timeout))
}

pub struct FetchUrlTool {
    client: reqwest::Client,
}

impl Default for FetchUrlTool {
    fn default() -> Self {
        Self::new()
    }
}

impl FetchUrlTool {
    pub fn new() -> Self {
        Self {
            client: browser_client(),
        }
    }
}

#[async_trait]
impl Tool for FetchUrlTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new(
            "fetch_url_content",
            "Fetch a web page and return its readable text (main/article content, no navigation or scripts)",
        )
        .arg(ArgSpec::required("url", ArgType::String, "Page URL"))
        .arg(
            ArgSpec::optional("timeout", ArgType::Integer, "Request timeout in seconds (default 15)")
                .with_default(15),
        )
    }

    async fn execute(&self, args: ToolArgs, _ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        let url = args.str("url")?;
        let timeout = timeout_arg(&args)?;

        let body = get_text(self.client.get(url), timeout).await?;
        let text = extract_text(&body);
        debug!(url, bytes = body.len(), chars = text.len(), "page fetched");
        Ok(ToolOutput::text(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::test_support::{call, ctx};
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, Request, ResponseTemplate};

    fn c() -> ToolContext {
        ctx(&std::env::temp_dir())
    }

    #[tokio::test]
    async fn fetches_and_cleans_page() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/docs"))
            // `header()` splits on commas, which the UA contains.
            .and(|req: &Request| {
                req.headers.get("user-agent").and_then(|v| v.to_str().ok()) == Some(BROWSER_USER_AGENT)
            })
            .respond_with(ResponseTemplate::new(200).set_body_string(
                "<html><body><nav>menu</nav><article><h2>Title</h2><p>Body text</p></article></body></html>",
            ))
            .mount(&server)
            .await;

        let out = call(
            &FetchUrlTool::new(),
            json!({"url": format!("{}/docs", server.uri())}),
            &c(),
        )
        .await
        .unwrap();
        assert_eq!(out.payload.as_text(), "Title\nBody text");
    }

    #[tokio::test]
    async fn http_error_is_network() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let err = call(&FetchUrlTool::new(), json!({"url": server.uri()}), &c())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Network(msg) if msg.contains("404")));
    }

    #[tokio::test]
    async fn slow_server_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("<p>late</p>")
                    .set_delay(Duration::from_secs(3)),
            )
            .mount(&server)
            .await;

        let err = call(&FetchUrlTool::new(), json!({"url": server.uri(), "timeout": 1}), &c())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Timeout(d) if d == Duration::from_secs(1)));
    }

    #[tokio::test]
    async fn unreachable_host_is_network() {
        let err = call(&FetchUrlTool::new(), json!({"url": "http://127.0.0.1:1/"}), &c())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Network(_)));
    }

    #[tokio::test]
    async fn zero_timeout_rejected() {
        let err = call(&FetchUrlTool::new(), json!({"url": "http://x", "timeout": 0}), &c())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Validation(_)));
    }
}
