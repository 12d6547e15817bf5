// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Broker subscription contract.
//
// The pipeline is written against these traits only; `amqp` provides the
// production implementation and the integration tests provide in-memory
// ones.

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::Stream;

use spoolbridge_core::Topic;
use spoolbridge_core::error::{AgentError, Result};

/// Final disposition of one delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    /// Processed; remove from the queue.
    Ack,
    /// Negative-acknowledge and put back on the queue for redelivery.
    Requeue,
    /// Negative-acknowledge without requeue; the broker drops (or
    /// dead-letters) it.
    Discard,
}

/// One message handed to a topic consumer.
#[async_trait]
pub trait Delivery: Send + Sync {
    /// Raw message body.
    fn body(&self) -> &[u8];

    /// Settle the delivery.  Called exactly once per delivery.
    async fn settle(&self, settlement: Settlement) -> Result<()>;
}

/// Sequence of deliveries for one topic.  Ends when the subscription or the
/// underlying connection closes.
pub type DeliveryStream = Pin<Box<dyn Stream<Item = Result<Box<dyn Delivery>>> + Send>>;

/// A live broker connection.
#[async_trait]
pub trait BrokerConnection: Send + Sync {
    /// Subscribe to `topic` as member of consumer group `group`.
    async fn subscribe(&self, topic: Topic, group: &str) -> Result<DeliveryStream>;

    /// Resolve when the connection is lost, with the reason.
    ///
    /// Must be cancel-safe: the supervisor races it against other events.
    async fn closed(&self) -> AgentError;

    /// Close the connection.  Idempotent.
    async fn close(&self) -> Result<()>;
}

/// Factory for broker connections.
#[async_trait]
pub trait Broker: Send + Sync {
    async fn connect(&self, url: &str) -> Result<Box<dyn BrokerConnection>>;
}
