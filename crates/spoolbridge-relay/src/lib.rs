// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Spoolbridge Relay: the print-job delivery pipeline.  A supervised,
// reconnecting broker consumer fans out to one task per topic; each task
// fetches job content, resolves the printer and hands the bytes to the raw
// print backend, settling every message as ack, requeue or discard.

pub mod amqp;
pub mod broker;
pub mod consumer;
pub mod control;
pub mod fetcher;
pub mod retry;
pub mod supervisor;

pub use amqp::AmqpBroker;
pub use broker::{Broker, BrokerConnection, Delivery, DeliveryStream, Settlement};
pub use consumer::{Pipeline, TopicConsumer};
pub use control::{ControlHandler, ControlResponse};
pub use fetcher::{ContentFetcher, HttpFetcher};
pub use retry::{RetryDecision, RetryTracker, fingerprint};
pub use supervisor::{Relay, Supervisor};
