// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// AMQP 0-9-1 broker implementation on top of `lapin`.
//
// Topology per topic (declared idempotently on every subscribe):
//
//   exchange  <topic>            direct, durable
//   queue     <topic>.<group>    durable
//   binding   routing key <group>
//
// Each subscription gets its own channel with prefetch 1 so a slow printer
// never has more than one unacknowledged job in flight per topic.

use std::sync::Mutex;

use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicQosOptions,
    ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{Channel, Connection, ConnectionProperties, ExchangeKind};
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use spoolbridge_core::Topic;
use spoolbridge_core::error::{AgentError, Result};

use crate::broker::{Broker, BrokerConnection, Delivery, DeliveryStream, Settlement};

/// Unacknowledged deliveries allowed per subscription.
const DEFAULT_PREFETCH: u16 = 1;

/// AMQP reply code for a normal connection close.
const REPLY_SUCCESS: u16 = 200;

/// Connection factory for an AMQP broker such as RabbitMQ.
#[derive(Debug, Clone)]
pub struct AmqpBroker {
    prefetch: u16,
}

impl Default for AmqpBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl AmqpBroker {
    pub fn new() -> Self {
        Self {
            prefetch: DEFAULT_PREFETCH,
        }
    }
}

#[async_trait]
impl Broker for AmqpBroker {
    #[instrument(skip_all)]
    async fn connect(&self, url: &str) -> Result<Box<dyn BrokerConnection>> {
        let connection = Connection::connect(url, ConnectionProperties::default())
            .await
            .map_err(|e| AgentError::Broker(format!("connect: {e}")))?;

        let (error_tx, error_rx) = mpsc::unbounded_channel();
        connection.on_error(move |err| {
            let _ = error_tx.send(err.to_string());
        });

        info!("AMQP connection established");
        Ok(Box::new(AmqpConnection {
            connection,
            errors: tokio::sync::Mutex::new(error_rx),
            channels: Mutex::new(Vec::new()),
            prefetch: self.prefetch,
        }))
    }
}

/// A live `lapin` connection plus the channels opened for subscriptions.
pub struct AmqpConnection {
    connection: Connection,
    errors: tokio::sync::Mutex<mpsc::UnboundedReceiver<String>>,
    channels: Mutex<Vec<Channel>>,
    prefetch: u16,
}

fn broker_err(step: &'static str) -> impl Fn(lapin::Error) -> AgentError {
    move |e| AgentError::Broker(format!("{step}: {e}"))
}

#[async_trait]
impl BrokerConnection for AmqpConnection {
    #[instrument(skip(self), fields(topic = %topic))]
    async fn subscribe(&self, topic: Topic, group: &str) -> Result<DeliveryStream> {
        let exchange = topic.exchange();
        let queue = format!("{exchange}.{group}");

        let channel = self
            .connection
            .create_channel()
            .await
            .map_err(broker_err("create channel"))?;

        channel
            .basic_qos(self.prefetch, BasicQosOptions::default())
            .await
            .map_err(broker_err("basic.qos"))?;

        channel
            .exchange_declare(
                exchange,
                ExchangeKind::Direct,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(broker_err("exchange.declare"))?;

        channel
            .queue_declare(
                &queue,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(broker_err("queue.declare"))?;

        channel
            .queue_bind(
                &queue,
                exchange,
                group,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(broker_err("queue.bind"))?;

        let consumer = channel
            .basic_consume(
                &queue,
                &format!("spoolbridge.{queue}"),
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(broker_err("basic.consume"))?;

        if let Ok(mut channels) = self.channels.lock() {
            channels.push(channel);
        }

        info!(queue = %queue, "subscribed");

        let stream = consumer.map(|item| {
            item.map(|inner| Box::new(AmqpDelivery { inner }) as Box<dyn Delivery>)
                .map_err(|e| AgentError::ConnectionLost(e.to_string()))
        });
        Ok(Box::pin(stream))
    }

    async fn closed(&self) -> AgentError {
        let mut errors = self.errors.lock().await;
        match errors.recv().await {
            Some(reason) => AgentError::ConnectionLost(reason),
            None => AgentError::ConnectionLost("connection error channel closed".into()),
        }
    }

    #[instrument(skip(self))]
    async fn close(&self) -> Result<()> {
        let channels: Vec<Channel> = self
            .channels
            .lock()
            .map(|mut c| c.drain(..).collect())
            .unwrap_or_default();

        if !self.connection.status().connected() {
            debug!("connection already closed");
            return Ok(());
        }

        for channel in channels {
            if let Err(e) = channel.close(REPLY_SUCCESS, "consumer stopping").await {
                debug!(error = %e, "channel close failed");
            }
        }

        match self.connection.close(REPLY_SUCCESS, "consumer stopping").await {
            Ok(()) => {
                info!("AMQP connection closed");
                Ok(())
            }
            Err(e) if !self.connection.status().connected() => {
                debug!(error = %e, "connection closed concurrently");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "AMQP connection close failed");
                Err(AgentError::Broker(format!("close: {e}")))
            }
        }
    }
}

/// A `lapin` delivery behind the pipeline's `Delivery` contract.
struct AmqpDelivery {
    inner: lapin::message::Delivery,
}

#[async_trait]
impl Delivery for AmqpDelivery {
    fn body(&self) -> &[u8] {
        &self.inner.data
    }

    async fn settle(&self, settlement: Settlement) -> Result<()> {
        let acker = &self.inner.acker;
        let outcome = match settlement {
            Settlement::Ack => acker.ack(BasicAckOptions::default()).await,
            Settlement::Requeue => {
                acker
                    .nack(BasicNackOptions {
                        multiple: false,
                        requeue: true,
                    })
                    .await
            }
            Settlement::Discard => {
                acker
                    .nack(BasicNackOptions {
                        multiple: false,
                        requeue: false,
                    })
                    .await
            }
        };
        outcome.map_err(|e| AgentError::Broker(format!("settle {settlement:?}: {e}")))
    }
}
