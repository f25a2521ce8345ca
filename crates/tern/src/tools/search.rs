use reqwest::{Client, StatusCode};
use schemars::{JsonSchema, schema_for};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tern_core::tool::{Error as ToolError, Tool, ToolResult};

/// The Tavily search endpoint.
pub const TAVILY_SEARCH_URL: &str = "https://api.tavily.com/search";

/// The default number of results per search.
pub const DEFAULT_MAX_RESULTS: u32 = 10;

#[derive(Deserialize, JsonSchema)]
pub struct SearchToolParameters {
    #[schemars(description = "The search query.")]
    query: String,
}

#[derive(Serialize)]
struct SearchRequest<'a> {
    query: &'a str,
    max_results: u32,
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
struct SearchResponse {
    query: String,
    #[serde(default)]
    answer: Option<String>,
    #[serde(default)]
    results: Vec<SearchResult>,
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
struct SearchResult {
    title: String,
    url: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    score: f64,
}

/// A tool for searching the web with the Tavily API.
pub struct SearchTool {
    client: Client,
    api_key: String,
    endpoint: String,
    max_results: u32,
    parameter_schema: Value,
}

impl SearchTool {
    /// Creates a new search tool with a Tavily API key.
    #[inline]
    pub fn new<S: Into<String>>(api_key: S) -> Self {
        SearchTool {
            client: Client::new(),
            api_key: api_key.into(),
            endpoint: TAVILY_SEARCH_URL.to_owned(),
            max_results: DEFAULT_MAX_RESULTS,
            parameter_schema: schema_for!(SearchToolParameters).to_value(),
        }
    }

    /// Sets the maximum number of results per search.
    #[inline]
    pub fn with_max_results(mut self, max_results: u32) -> Self {
        self.max_results = max_results;
        self
    }

    /// Overrides the search endpoint.
    #[inline]
    pub fn with_endpoint<S: Into<String>>(mut self, endpoint: S) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

impl Tool for SearchTool {
    type Input = SearchToolParameters;

    fn name(&self) -> &str {
        "tavily_search"
    }

    fn description(&self) -> &str {
        r#"
Search for general web results.
This tool performs a search using the Tavily search engine, which is designed
to provide comprehensive, accurate, and trusted results. It's particularly useful
for answering questions about current events."#
    }

    fn parameter_schema(&self) -> &Value {
        &self.parameter_schema
    }

    #[allow(clippy::manual_async_fn)]
    fn execute(
        &self,
        input: SearchToolParameters,
    ) -> impl Future<Output = ToolResult> + Send + 'static {
        let req = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&SearchRequest {
                query: &input.query,
                max_results: self.max_results,
            });
        async move {
            debug!("searching: {}", input.query);
            let resp = req.send().await.map_err(|err| {
                ToolError::execution_error()
                    .with_reason(format!("search request failed: {err}"))
            })?;

            let status = resp.status();
            if status != StatusCode::OK {
                let body = resp.text().await.unwrap_or_default();
                warn!("search failed with status {status}: {body}");
                return Err(ToolError::execution_error()
                    .with_reason(format!("search failed with status {status}")));
            }

            let resp: SearchResponse = resp.json().await.map_err(|err| {
                ToolError::execution_error()
                    .with_reason(format!("invalid search response: {err}"))
            })?;
            debug!("got {} search results", resp.results.len());

            serde_json::to_string(&resp).map_err(|err| {
                ToolError::execution_error().with_reason(err.to_string())
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn input(query: &str) -> SearchToolParameters {
        SearchToolParameters {
            query: query.to_owned(),
        }
    }

    #[tokio::test]
    async fn test_search() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/search"))
            .and(header("authorization", "Bearer tvly-test"))
            .and(body_json(json!({ "query": "rust 2024", "max_results": 3 })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "query": "rust 2024",
                "answer": "Rust 2024 is an edition.",
                "results": [{
                    "title": "Rust 2024",
                    "url": "https://example.com/rust",
                    "content": "The Rust 2024 edition.",
                    "score": 0.9,
                    "raw_content": null
                }],
                "response_time": 0.5
            })))
            .expect(1)
            .mount(&server)
            .await;

        let tool = SearchTool::new("tvly-test")
            .with_endpoint(format!("{}/search", server.uri()))
            .with_max_results(3);
        let output = tool.execute(input("rust 2024")).await.unwrap();

        let output: Value = serde_json::from_str(&output).unwrap();
        assert_eq!(output["answer"], "Rust 2024 is an edition.");
        assert_eq!(output["results"][0]["url"], "https://example.com/rust");
        assert_eq!(output["results"].as_array().unwrap().len(), 1);
        assert!(output["results"][0].get("raw_content").is_none());
    }

    #[tokio::test]
    async fn test_search_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(401)
                    .set_body_json(json!({ "detail": { "error": "Unauthorized" } })),
            )
            .mount(&server)
            .await;

        let tool = SearchTool::new("bad-key").with_endpoint(server.uri());
        let err = tool.execute(input("anything")).await.unwrap_err();
        assert!(err.reason().contains("401"), "{err}");
    }
}
