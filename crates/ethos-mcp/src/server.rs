//! MCP server: initialize handshake, tool listing, tool dispatch.

use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::protocol::messages::{
    CallToolRequest, CallToolResult, InitializeRequest, InitializeResult, ListToolsResult,
    ServerCapabilities, ServerInfo, ToolDescription,
};
use crate::protocol::types::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, MCP_VERSION};
use crate::tools::{self, ToolContext};

/// MCP server over one tool context
pub struct McpServer {
    context: ToolContext,
    initialized: bool,
}

impl McpServer {
    pub fn new(context: ToolContext) -> Self {
        Self {
            context,
            initialized: false,
        }
    }

    /// Handle an incoming JSON-RPC request; `None` for notifications.
    pub async fn handle_request(&mut self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        debug!(method = %request.method, "handling request");

        if !self.initialized
            && request.method != "initialize"
            && request.method != "notifications/initialized"
        {
            warn!(method = %request.method, "rejecting request, server not initialized");
            return Some(JsonRpcResponse::error(
                request.id,
                JsonRpcError::server_not_initialized(),
            ));
        }

        let result = match request.method.as_str() {
            "initialize" => self.handle_initialize(request.params),
            "notifications/initialized" => return None,
            "tools/list" => self.handle_tools_list(),
            "tools/call" => self.handle_tools_call(request.params).await,
            "ping" => Ok(json!({})),
            method => {
                warn!(method, "unknown method");
                Err(JsonRpcError::method_not_found())
            }
        };

        Some(match result {
            Ok(result) => JsonRpcResponse::success(request.id, result),
            Err(error) => JsonRpcResponse::error(request.id, error),
        })
    }

    fn handle_initialize(&mut self, params: Option<Value>) -> Result<Value, JsonRpcError> {
        let request: InitializeRequest = match params {
            Some(p) => serde_json::from_value(p)
                .map_err(|e| JsonRpcError::invalid_params(&e.to_string()))?,
            None => InitializeRequest::default(),
        };

        // Version negotiation: accept an older client version
        let negotiated = if request.protocol_version.as_str() < MCP_VERSION {
            info!(version = %request.protocol_version, "client requested older protocol version");
            request.protocol_version
        } else {
            MCP_VERSION.to_string()
        };

        self.initialized = true;
        let result = InitializeResult {
            protocol_version: negotiated,
            capabilities: ServerCapabilities { tools: json!({}) },
            server_info: ServerInfo {
                name: "ethos-mcp".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        };
        serde_json::to_value(result).map_err(|e| JsonRpcError::internal_error(&e.to_string()))
    }

    fn handle_tools_list(&self) -> Result<Value, JsonRpcError> {
        let tool = |name: &str, description: &str, schema: Value| ToolDescription {
            name: name.to_string(),
            description: description.to_string(),
            input_schema: schema,
        };
        let result = ListToolsResult {
            tools: vec![
                tool(
                    "dissonance_check",
                    tools::dissonance::CHECK_DESCRIPTION,
                    tools::dissonance::check_schema(),
                ),
                tool(
                    "resolve_dissonance",
                    tools::dissonance::RESOLVE_DESCRIPTION,
                    tools::dissonance::resolve_schema(),
                ),
                tool(
                    "smf_pending_proposals",
                    tools::smf::PENDING_DESCRIPTION,
                    tools::smf::pending_schema(),
                ),
                tool(
                    "smf_review",
                    tools::smf::REVIEW_DESCRIPTION,
                    tools::smf::review_schema(),
                ),
                tool(
                    "smf_approve",
                    tools::smf::APPROVE_DESCRIPTION,
                    tools::smf::approve_schema(),
                ),
                tool(
                    "smf_reject",
                    tools::smf::REJECT_DESCRIPTION,
                    tools::smf::reject_schema(),
                ),
                tool(
                    "smf_undo",
                    tools::smf::UNDO_DESCRIPTION,
                    tools::smf::undo_schema(),
                ),
                tool(
                    "smf_bulk_approve",
                    tools::smf::BULK_APPROVE_DESCRIPTION,
                    tools::smf::bulk_approve_schema(),
                ),
                tool(
                    "reclassify_memory_sector",
                    tools::reclassify::DESCRIPTION,
                    tools::reclassify::schema(),
                ),
                tool(
                    "update_insight",
                    tools::insights::UPDATE_DESCRIPTION,
                    tools::insights::update_schema(),
                ),
                tool(
                    "delete_insight",
                    tools::insights::DELETE_DESCRIPTION,
                    tools::insights::delete_schema(),
                ),
            ],
        };
        serde_json::to_value(result).map_err(|e| JsonRpcError::internal_error(&e.to_string()))
    }

    async fn handle_tools_call(&self, params: Option<Value>) -> Result<Value, JsonRpcError> {
        let request: CallToolRequest = match params {
            Some(p) => serde_json::from_value(p)
                .map_err(|e| JsonRpcError::invalid_params(&e.to_string()))?,
            None => return Err(JsonRpcError::invalid_params("missing params")),
        };

        let ctx = &self.context;
        let args = &request.arguments;
        let payload = match request.name.as_str() {
            "dissonance_check" => tools::dissonance::handle_check(ctx, args).await,
            "resolve_dissonance" => tools::dissonance::handle_resolve(ctx, args).await,
            "smf_pending_proposals" => tools::smf::handle_pending(ctx, args).await,
            "smf_review" => tools::smf::handle_review(ctx, args).await,
            "smf_approve" => tools::smf::handle_approve(ctx, args).await,
            "smf_reject" => tools::smf::handle_reject(ctx, args).await,
            "smf_undo" => tools::smf::handle_undo(ctx, args).await,
            "smf_bulk_approve" => tools::smf::handle_bulk_approve(ctx, args).await,
            "reclassify_memory_sector" => tools::reclassify::handle(ctx, args).await,
            "update_insight" => tools::insights::handle_update(ctx, args).await,
            "delete_insight" => tools::insights::handle_delete(ctx, args).await,
            unknown => {
                return Err(JsonRpcError::invalid_params(&format!(
                    "unknown tool '{unknown}'"
                )));
            }
        };

        serde_json::to_value(CallToolResult::json(&payload))
            .map_err(|e| JsonRpcError::internal_error(&e.to_string()))
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::tests_support::{harness_with_llm, scripted_none_llm};

    fn request(method: &str, params: Value) -> JsonRpcRequest {
        JsonRpcRequest {
            jsonrpc: "2.0".into(),
            id: Some(json!(1)),
            method: method.into(),
            params: Some(params),
        }
    }

    #[tokio::test]
    async fn test_requires_initialization() {
        let ctx = harness_with_llm(scripted_none_llm()).await;
        let mut server = McpServer::new(ctx);

        let response = server
            .handle_request(request("tools/list", json!({})))
            .await
            .unwrap();
        assert!(response.error.is_some());

        let response = server
            .handle_request(request("initialize", json!({})))
            .await
            .unwrap();
        assert!(response.error.is_none());

        let response = server
            .handle_request(request("tools/list", json!({})))
            .await
            .unwrap();
        let tools = response.result.unwrap();
        let names: Vec<&str> = tools["tools"]
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["name"].as_str().unwrap())
            .collect();
        assert_eq!(names.len(), 11);
        for expected in [
            "dissonance_check",
            "resolve_dissonance",
            "smf_pending_proposals",
            "smf_review",
            "smf_approve",
            "smf_reject",
            "smf_undo",
            "smf_bulk_approve",
            "reclassify_memory_sector",
            "update_insight",
            "delete_insight",
        ] {
            assert!(names.contains(&expected), "missing tool {expected}");
        }
    }

    #[tokio::test]
    async fn test_tool_call_roundtrip() {
        let ctx = harness_with_llm(scripted_none_llm()).await;
        let mut server = McpServer::new(ctx);
        server
            .handle_request(request("initialize", json!({})))
            .await
            .unwrap();

        let response = server
            .handle_request(request(
                "tools/call",
                json!({"name": "smf_pending_proposals", "arguments": {}}),
            ))
            .await
            .unwrap();
        let result = response.result.unwrap();
        let text = result["content"][0]["text"].as_str().unwrap();
        let payload: Value = serde_json::from_str(text).unwrap();
        assert_eq!(payload["count"], 0);
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let ctx = harness_with_llm(scripted_none_llm()).await;
        let mut server = McpServer::new(ctx);
        server
            .handle_request(request("initialize", json!({})))
            .await
            .unwrap();
        let response = server
            .handle_request(request("tools/call", json!({"name": "nope", "arguments": {}})))
            .await
            .unwrap();
        assert!(response.error.is_some());
    }
}
