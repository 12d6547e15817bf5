// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Control-plane command dispatch.
//
// Request:  {"action": "ping" | "get_printers" | "print" | "config", "data": ...}
// Response: {"status": "ok" | "error", "data"?: ..., "message"?: "..."}
//
// Transport-agnostic: the binary feeds it lines from a local socket, tests
// feed it strings.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use spoolbridge_core::AgentConfig;
use spoolbridge_core::error::{AgentError, Result};
use spoolbridge_print::PrinterDirectory;

use crate::supervisor::Relay;

/// Reply to one control request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlResponse {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ControlResponse {
    pub fn ok_message(message: impl Into<String>) -> Self {
        Self {
            status: "ok".into(),
            data: None,
            message: Some(message.into()),
        }
    }

    pub fn ok_data(data: Value) -> Self {
        Self {
            status: "ok".into(),
            data: Some(data),
            message: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: "error".into(),
            data: None,
            message: Some(message.into()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

#[derive(Debug, Deserialize)]
struct ControlRequest {
    action: String,
    #[serde(default)]
    data: Value,
}

#[derive(Debug, Deserialize)]
struct PrintRequest {
    #[serde(default)]
    text: String,
    #[serde(default)]
    printer: Option<String>,
}

/// Dispatches control actions against the relay and the local printers.
pub struct ControlHandler {
    relay: Arc<Relay>,
    directory: Arc<dyn PrinterDirectory>,
}

impl ControlHandler {
    pub fn new(relay: Arc<Relay>, directory: Arc<dyn PrinterDirectory>) -> Self {
        Self { relay, directory }
    }

    /// Handle one raw JSON request.  Never fails; errors become responses.
    pub async fn handle(&self, raw: &str) -> ControlResponse {
        let request: ControlRequest = match serde_json::from_str(raw) {
            Ok(request) => request,
            Err(e) => {
                warn!(error = %e, "unparseable control request");
                return ControlResponse::error(format!("invalid request: {e}"));
            }
        };

        info!(action = %request.action, "control request");
        let outcome = match request.action.as_str() {
            "ping" => Ok(ControlResponse::ok_message("pong")),
            "get_printers" => self.printers().await,
            "print" => self.print(request.data).await,
            "config" => self.configure(request.data).await,
            other => Err(AgentError::InvalidRequest(format!("unknown action: {other}"))),
        };

        outcome.unwrap_or_else(|e| {
            warn!(action = %request.action, error = %e, "control request failed");
            ControlResponse::error(message_for(&e))
        })
    }

    async fn printers(&self) -> Result<ControlResponse> {
        let directory = Arc::clone(&self.directory);
        let printers = tokio::task::spawn_blocking(move || directory.list_printers())
            .await
            .map_err(|e| AgentError::Discovery(format!("printer listing task failed: {e}")))??;

        info!(count = printers.len(), "printers listed");
        Ok(ControlResponse::ok_data(Value::from(printers)))
    }

    /// Immediate print with no retry.
    async fn print(&self, data: Value) -> Result<ControlResponse> {
        let request: PrintRequest = serde_json::from_value(data)
            .map_err(|e| AgentError::InvalidRequest(format!("print expects an object: {e}")))?;
        if request.text.is_empty() {
            return Err(AgentError::InvalidRequest("field `text` is required".into()));
        }

        let requested = request.printer.unwrap_or_default();
        let printer = self
            .relay
            .pipeline()
            .print(&requested, request.text.into_bytes())
            .await?;

        info!(printer = %printer, "control print sent");
        Ok(ControlResponse::ok_message("print sent"))
    }

    async fn configure(&self, data: Value) -> Result<ControlResponse> {
        let config: AgentConfig = serde_json::from_value(data).map_err(|e| {
            AgentError::IncompleteConfig(format!(
                "access_token, schema_name, backend_url and broker_url are required ({e})"
            ))
        })?;

        self.relay.apply_config(config).await?;
        Ok(ControlResponse::ok_message("configuration applied"))
    }
}

/// Client-facing text for `err`; request errors are shown without prefix.
fn message_for(err: &AgentError) -> String {
    match err {
        AgentError::InvalidRequest(msg) => msg.clone(),
        other => other.to_string(),
    }
}
