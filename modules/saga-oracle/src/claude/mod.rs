mod client;
pub(crate) mod types;

use async_trait::async_trait;
use tracing::debug;

use client::ClaudeClient;
use types::*;

use crate::error::OracleError;
use crate::traits::{DecisionOracle, OracleRequest};
use crate::util::strip_code_blocks;

const TOOL_NAME: &str = "structured_response";

/// Decision oracle backed by the Anthropic Messages API. Structured output is obtained
/// by forcing a single tool call whose input schema is the decision's wire format.
#[derive(Clone)]
pub struct ClaudeOracle {
    api_key: String,
    model: String,
    base_url: Option<String>,
    http: reqwest::Client,
}

impl ClaudeOracle {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            base_url: None,
            http: reqwest::Client::new(),
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn client(&self) -> ClaudeClient {
        let client = ClaudeClient::new(&self.api_key, self.http.clone());
        match self.base_url {
            Some(ref url) => client.with_base_url(url),
            None => client,
        }
    }
}

#[async_trait]
impl DecisionOracle for ClaudeOracle {
    async fn decide(&self, request: &OracleRequest) -> Result<serde_json::Value, OracleError> {
        let mut chat = ChatRequest::new(&self.model)
            .system(request.system.as_str())
            .message(WireMessage::user(request.prompt.as_str()))
            .temperature(0.0)
            .tool(ToolDefinitionWire {
                name: TOOL_NAME.to_string(),
                description: format!("Record the {} decision.", request.kind),
                input_schema: request.schema.clone(),
            });
        chat.tool_choice = Some(serde_json::json!({
            "type": "tool",
            "name": TOOL_NAME,
        }));

        let response = self.client().chat(&chat).await?;
        debug!(kind = %request.kind, stop_reason = ?response.stop_reason, "Claude decision received");

        if let Some(input) = response.tool_input(TOOL_NAME) {
            return Ok(input.clone());
        }

        // Some responses put the JSON in a text block despite the forced tool.
        if let Some(text) = response.text() {
            return serde_json::from_str(strip_code_blocks(text))
                .map_err(|e| OracleError::Invalid(format!("no tool call and unparseable text: {e}")));
        }

        Err(OracleError::Invalid("No structured output in Claude response".to_string()))
    }
}
