//! MCP Client: JSON-RPC over streamable HTTP, one session per tool call.

use couponclaw_core::config::ProviderConfig;
use couponclaw_core::error::ProviderError;
use couponclaw_core::types::Credential;
use reqwest::StatusCode;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, HeaderMap};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const SESSION_HEADER: &str = "Mcp-Session-Id";
const PROTOCOL_HEADER: &str = "MCP-Protocol-Version";

/// Phrases the provider uses when it rejects a token.
const AUTH_MARKERS: [&str; 4] = ["unauthorized", "forbidden", "invalid token", "token invalid"];

#[derive(Debug, Serialize)]
struct JsonRpcRequest {
    jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<u64>,
    method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<serde_json::Value>,
}

impl JsonRpcRequest {
    fn new(id: u64, method: &str, params: Option<serde_json::Value>) -> Self {
        Self { jsonrpc: "2.0", id: Some(id), method: method.into(), params }
    }

    fn notification(method: &str) -> Self {
        Self { jsonrpc: "2.0", id: None, method: method.into(), params: None }
    }
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    id: Option<serde_json::Value>,
    #[serde(default)]
    result: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct ToolCallResult {
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default, rename = "isError")]
    is_error: bool,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    content_type: String,
    #[serde(default)]
    text: Option<String>,
}

/// True if provider text signals a rejected credential.
pub fn looks_like_auth_failure(text: &str) -> bool {
    let lower = text.to_lowercase();
    AUTH_MARKERS.iter().any(|m| lower.contains(m))
}

/// MCP client. Stateless between calls: each `call_tool` runs a fresh
/// `initialize` handshake with the caller's bearer token.
pub struct McpClient {
    http: reqwest::Client,
    endpoint: String,
    protocol_version: String,
}

/// Per-call session state.
struct Session<'a> {
    token: &'a Credential,
    session_id: Option<String>,
    next_id: u64,
}

impl McpClient {
    pub fn new(config: &ProviderConfig) -> Result<Self, ProviderError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("couponclaw/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ProviderError::Network(format!("HTTP client init failed: {e}")))?;
        Ok(Self {
            http,
            endpoint: config.endpoint.clone(),
            protocol_version: config.protocol_version.clone(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Call a tool and return its concatenated text content.
    pub async fn call_tool(
        &self,
        token: &Credential,
        tool_name: &str,
        arguments: Option<serde_json::Value>,
    ) -> Result<String, ProviderError> {
        if token.expose().trim().is_empty() {
            return Err(ProviderError::Auth("empty token".into()));
        }

        let started = std::time::Instant::now();
        let mut session = Session { token, session_id: None, next_id: 1 };
        self.initialize(&mut session).await?;

        let mut params = serde_json::json!({ "name": tool_name });
        if let Some(arguments) = arguments {
            params["arguments"] = arguments;
        }
        let id = session.next_id();
        let res = self
            .request(&mut session, &JsonRpcRequest::new(id, "tools/call", Some(params)))
            .await?;

        if let Some(err) = res.error {
            return Err(classify_rpc_error(tool_name, &err));
        }

        let Some(result) = res.result else {
            return Ok(String::new());
        };
        let call_result: ToolCallResult = serde_json::from_value(result)
            .map_err(|e| ProviderError::Protocol(format!("Parse tool result error: {e}")))?;

        let output = call_result
            .content
            .iter()
            .filter(|c| c.content_type == "text")
            .filter_map(|c| c.text.as_deref())
            .collect::<Vec<_>>()
            .join("\n");

        if call_result.is_error {
            return Err(if looks_like_auth_failure(&output) || output.contains("401") {
                ProviderError::Auth(format!("Tool '{tool_name}' rejected the token"))
            } else {
                ProviderError::Protocol(format!("Tool '{tool_name}' returned error: {output}"))
            });
        }
        if looks_like_auth_failure(&output) {
            return Err(ProviderError::Auth(format!("Tool '{tool_name}' rejected the token")));
        }

        tracing::debug!("🔧 MCP tool={tool_name} finished in {:.1}s", started.elapsed().as_secs_f64());
        Ok(output)
    }

    /// Initialize the MCP session (handshake).
    async fn initialize(&self, session: &mut Session<'_>) -> Result<(), ProviderError> {
        let id = session.next_id();
        let req = JsonRpcRequest::new(
            id,
            "initialize",
            Some(serde_json::json!({
                "protocolVersion": self.protocol_version,
                "capabilities": {},
                "clientInfo": {
                    "name": "couponclaw",
                    "version": env!("CARGO_PKG_VERSION")
                }
            })),
        );
        let res = self.request(session, &req).await?;
        if let Some(err) = res.error {
            return Err(classify_rpc_error("initialize", &err));
        }

        self.notify(session, &JsonRpcRequest::notification("notifications/initialized"))
            .await
    }

    /// POST a request and wait for the response carrying the same id.
    async fn request(
        &self,
        session: &mut Session<'_>,
        req: &JsonRpcRequest,
    ) -> Result<JsonRpcResponse, ProviderError> {
        let resp = self.post(session, req).await?;
        let is_sse = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("text/event-stream"));
        let body = resp
            .text()
            .await
            .map_err(|e| ProviderError::Network(format!("read body: {e}")))?;

        let wanted = req.id.map(serde_json::Value::from);
        if is_sse {
            parse_sse_response(&body, wanted.as_ref())
        } else {
            serde_json::from_str(&body)
                .map_err(|e| ProviderError::Protocol(format!("invalid JSON-RPC response: {e}")))
        }
    }

    /// POST a notification; no response body is expected.
    async fn notify(&self, session: &mut Session<'_>, req: &JsonRpcRequest) -> Result<(), ProviderError> {
        self.post(session, req).await.map(|_| ())
    }

    async fn post(&self, session: &mut Session<'_>, req: &JsonRpcRequest) -> Result<reqwest::Response, ProviderError> {
        let mut builder = self
            .http
            .post(&self.endpoint)
            .header(AUTHORIZATION, format!("Bearer {}", session.token.expose()))
            .header(PROTOCOL_HEADER, &self.protocol_version)
            .header(ACCEPT, "application/json, text/event-stream")
            .json(req);
        if let Some(sid) = &session.session_id {
            builder = builder.header(SESSION_HEADER, sid);
        }

        let resp = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                ProviderError::Network(format!("{} timed out", req.method))
            } else {
                ProviderError::Network(format!("{} failed: {e}", req.method))
            }
        })?;

        if let Some(sid) = session_id(resp.headers()) {
            session.session_id = Some(sid);
        }
        check_status(resp.status(), &req.method)?;
        Ok(resp)
    }
}

impl Session<'_> {
    fn next_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}

fn session_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Map an HTTP status onto the provider error taxonomy.
fn check_status(status: StatusCode, method: &str) -> Result<(), ProviderError> {
    let reason = format!("{method}: HTTP {status}");
    if status.is_success() {
        Ok(())
    } else if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        Err(ProviderError::Auth(reason))
    } else if status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
    {
        Err(ProviderError::Network(reason))
    } else {
        Err(ProviderError::Protocol(reason))
    }
}

fn classify_rpc_error(what: &str, err: &JsonRpcError) -> ProviderError {
    if looks_like_auth_failure(&err.message) || err.message.contains("401") {
        ProviderError::Auth(format!("{what}: {}", err.message))
    } else {
        ProviderError::Protocol(format!("{what}: {} (code {})", err.message, err.code))
    }
}

/// Pick the JSON-RPC response with id `wanted` out of an SSE body.
fn parse_sse_response(body: &str, wanted: Option<&serde_json::Value>) -> Result<JsonRpcResponse, ProviderError> {
    let mut data = String::new();
    let mut events = Vec::new();
    for line in body.lines() {
        if let Some(rest) = line.strip_prefix("data:") {
            if !data.is_empty() {
                data.push('\n');
            }
            data.push_str(rest.strip_prefix(' ').unwrap_or(rest));
        } else if line.trim().is_empty() && !data.is_empty() {
            events.push(std::mem::take(&mut data));
        }
    }
    if !data.is_empty() {
        events.push(data);
    }

    for event in events {
        let Ok(res) = serde_json::from_str::<JsonRpcResponse>(&event) else {
            continue;
        };
        if wanted.is_none() || res.id.as_ref() == wanted {
            return Ok(res);
        }
    }
    Err(ProviderError::Protocol("event stream ended without a response".into()))
}
