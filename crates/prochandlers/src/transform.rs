use async_trait::async_trait;
use proccore::{HandlerMetadata, Outcome, ServiceHandler, TaskContext, Value};

/// Parse the `json` string into `parsed`
pub struct JsonParseHandler;

impl JsonParseHandler {
    pub const NAME: &'static str = "transform.json_parse";
}

#[async_trait]
impl ServiceHandler for JsonParseHandler {
    async fn handle(&self, ctx: TaskContext) -> Outcome {
        let input = match ctx.get("json") {
            Some(Value::String(s)) => s,
            Some(other) => return Outcome::fatal(format!("'json' must be a string, got {}", other.type_name())),
            None => return Outcome::fatal("missing required input 'json'"),
        };

        match serde_json::from_str::<serde_json::Value>(input) {
            Ok(parsed) => Outcome::success().with_output("parsed", Value::from(parsed)),
            Err(e) => Outcome::fatal(format!("JSON parse error: {}", e)),
        }
    }

    fn metadata(&self) -> HandlerMetadata {
        HandlerMetadata {
            description: "Parse the json string into parsed".to_string(),
            category: "transform".to_string(),
        }
    }
}

/// Render `value` as a JSON string into `json`
pub struct JsonStringifyHandler;

impl JsonStringifyHandler {
    pub const NAME: &'static str = "transform.json_stringify";
}

#[async_trait]
impl ServiceHandler for JsonStringifyHandler {
    async fn handle(&self, ctx: TaskContext) -> Outcome {
        let Some(value) = ctx.get("value") else {
            return Outcome::fatal("missing required input 'value'");
        };

        match serde_json::to_string(value) {
            Ok(json) => Outcome::success().with_output("json", json),
            Err(e) => Outcome::fatal(format!("JSON stringify error: {}", e)),
        }
    }

    fn metadata(&self) -> HandlerMetadata {
        HandlerMetadata {
            description: "Convert value to a JSON string".to_string(),
            category: "transform".to_string(),
        }
    }
}
