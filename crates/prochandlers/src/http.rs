use async_trait::async_trait;
use proccore::{DataMap, HandlerMetadata, Outcome, ServiceHandler, TaskContext, Value};
use std::collections::BTreeMap;

/// HTTP request to `url` using `method`, optional `body` and `headers`.
///
/// Network errors, 429 and 5xx responses are retryable; any other 4xx is
/// fatal. Success stores `status`, `body` and `headers`.
pub struct HttpRequestHandler {
    client: reqwest::Client,
}

impl HttpRequestHandler {
    pub const NAME: &'static str = "http.request";

    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpRequestHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ServiceHandler for HttpRequestHandler {
    async fn handle(&self, ctx: TaskContext) -> Outcome {
        let Some(url) = ctx.get_str("url") else {
            return Outcome::fatal("missing required string input 'url'");
        };
        let method = ctx.get_str("method").unwrap_or("GET").to_uppercase();

        tracing::info!("{} {} ({} attempt {})", method, url, ctx.node_id, ctx.attempt);

        let request = match method.as_str() {
            "GET" => self.client.get(url),
            "POST" => self.client.post(url),
            "PUT" => self.client.put(url),
            "PATCH" => self.client.patch(url),
            "DELETE" => self.client.delete(url),
            _ => return Outcome::fatal(format!("Unsupported method: {}", method)),
        };

        let request = match ctx.get("body") {
            Some(Value::String(text)) => request.body(text.clone()),
            Some(Value::Null) | None => request,
            Some(body) => request.json(&serde_json::Value::from(body.clone())),
        };

        // Add headers if provided
        let request = match ctx.get("headers").and_then(Value::as_object) {
            Some(headers) => headers.iter().fold(request, |req, (key, value)| match value.as_str() {
                Some(v) => req.header(key.as_str(), v),
                None => req,
            }),
            None => request,
        };

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => return Outcome::retry(format!("HTTP request failed: {}", e)),
        };

        let status = response.status();
        if status.as_u16() == 429 || status.is_server_error() {
            return Outcome::retry(format!("HTTP {}", status));
        }
        if status.is_client_error() {
            return Outcome::fatal(format!("HTTP {}", status));
        }

        let headers: BTreeMap<String, Value> = response
            .headers()
            .iter()
            .map(|(k, v)| (k.to_string(), Value::from(v.to_str().unwrap_or(""))))
            .collect();

        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => return Outcome::retry(format!("Failed to read response: {}", e)),
        };

        tracing::debug!("Response status: {}", status);

        let mut output = DataMap::new();
        output.insert("status".to_string(), Value::from(status.as_u16() as i64));
        output.insert("body".to_string(), Value::from(body));
        output.insert("headers".to_string(), Value::Object(headers));
        Outcome::Success(output)
    }

    fn metadata(&self) -> HandlerMetadata {
        HandlerMetadata {
            description: "Make HTTP requests".to_string(),
            category: "http".to_string(),
        }
    }
}
