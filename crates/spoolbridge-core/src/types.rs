// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core domain types for the Spoolbridge delivery pipeline.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AgentError, Result};

/// Printer name that tells a raw print backend to ask the OS for its default.
pub const DEFAULT_PRINTER: &str = "default";

/// Correlation identifier attached to one message's processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Broker topics carrying print events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Topic {
    /// Shift open/close reports.
    Shift,
    /// Kitchen tickets for groups of order items.
    GroupItem,
    /// Customer order receipts.
    Order,
    /// Delivery order receipts.
    OrderDelivery,
}

impl Topic {
    /// Topics a consumer subscribes to unless told otherwise.
    pub const DEFAULT_SUBSCRIPTIONS: [Topic; 3] = [Topic::Shift, Topic::GroupItem, Topic::Order];

    /// Broker exchange name.
    pub fn exchange(&self) -> &'static str {
        match self {
            Self::Shift => "shift",
            Self::GroupItem => "group_item",
            Self::Order => "order",
            Self::OrderDelivery => "order_delivery",
        }
    }

    /// Backend route for a bare id-style reference on this topic.
    pub fn content_route(&self, id: &str) -> String {
        match self {
            Self::GroupItem => format!("/order-print/kitchen/{id}"),
            Self::Shift | Self::Order | Self::OrderDelivery => format!("/order-print/{id}"),
        }
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.exchange())
    }
}

/// How a print message points at its content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobReference {
    /// Backend-relative path, fetched verbatim.
    Path(String),
    /// Bare identifier, fetched through the topic's content route.
    Id(String),
}

impl JobReference {
    /// Backend-relative request path for this reference on `topic`.
    pub fn request_path(&self, topic: Topic) -> String {
        match self {
            Self::Path(path) if path.starts_with('/') => path.clone(),
            Self::Path(path) => format!("/{path}"),
            Self::Id(id) => topic.content_route(id),
        }
    }
}

impl std::fmt::Display for JobReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Path(path) => f.write_str(path),
            Self::Id(id) => f.write_str(id),
        }
    }
}

/// Message body as it appears on the wire.
///
/// Older deployments send `path`, newer ones send `id`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PrintMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default)]
    pub printer_name: Option<String>,
}

/// One decoded print request.  Lives for a single message's processing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrintJob {
    pub reference: JobReference,
    pub requested_printer: String,
}

impl PrintJob {
    /// Decode a raw message body.
    ///
    /// Anything that is not a JSON object carrying a non-empty `path` or `id`
    /// is `Malformed`.  `path` wins when both are present.
    pub fn decode(body: &[u8]) -> Result<Self> {
        let message: PrintMessage =
            serde_json::from_slice(body).map_err(|e| AgentError::Malformed(e.to_string()))?;
        Self::try_from(message)
    }
}

impl TryFrom<PrintMessage> for PrintJob {
    type Error = AgentError;

    fn try_from(message: PrintMessage) -> Result<Self> {
        let non_empty = |field: Option<String>| field.filter(|s| !s.trim().is_empty());

        let reference = match (non_empty(message.path), non_empty(message.id)) {
            (Some(path), _) => JobReference::Path(path),
            (None, Some(id)) => JobReference::Id(id),
            (None, None) => {
                return Err(AgentError::Malformed(
                    "message carries neither `path` nor `id`".into(),
                ));
            }
        };

        Ok(Self {
            reference,
            requested_printer: message.printer_name.unwrap_or_default(),
        })
    }
}

/// Lifecycle of a consumer supervisor instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConsumerState {
    /// Created, loop not yet running.
    Idle,
    /// Opening the broker connection and subscribing.
    Connecting,
    /// Every topic is subscribed and being consumed.
    Consuming,
    /// Waiting out the backoff after a failed or lost connection.
    Reconnecting,
    /// Terminal; a new instance is needed to consume again.
    Stopped,
}

/// Failure taxonomy used by the delivery pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorClass {
    /// Undecodable message or request, dropped, never retried.
    Malformed,
    /// Backend unreachable, bad status, timeout, retried up to the bound.
    TransientRemote,
    /// Printer or spooler failure, retried up to the bound.
    TransientLocal,
    /// Retry bound reached, so the message is discarded as poison.
    Exhausted,
    /// Broker disconnect, the supervisor reconnects.
    ConnectionLost,
    /// No usable configuration, so the consumer does not start.
    FatalConfig,
}

impl ErrorClass {
    /// Whether a failure of this class consumes retry budget.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientRemote | Self::TransientLocal)
    }
}
