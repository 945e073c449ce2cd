use async_trait::async_trait;
use futures::StreamExt;
use lapin::options::{
    BasicConsumeOptions, BasicPublishOptions, ConfirmSelectOptions, ExchangeDeclareOptions,
    QueueBindOptions, QueueDeclareOptions,
};
use lapin::publisher_confirm::Confirmation;
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind};
use tracing::{debug, info};

use crate::messages::{EnrichedResult, ProfileEvent, StatsSnapshot};
use crate::sink::{ResultSink, SinkError, StatsSink};

/// Names of the exchange and queues the service reads from and writes to.
#[derive(Debug, Clone)]
pub struct Topology {
    /// Direct exchange that both ingress events and enriched results are routed through.
    pub exchange: String,
    /// Routing key binding `queue` to `exchange`.
    pub routing_key: String,
    /// Queue profile events are consumed from.
    pub queue: String,
    /// Queue stats snapshots are published to, through the default exchange.
    pub stats_queue: String,
}

/// A connection to a RabbitMQ broker with a single channel shared by consumers and publishers.
pub struct AmqpBroker {
    connection: Connection,
    channel: Channel,
    topology: Topology,
}

impl AmqpBroker {
    pub async fn connect(url: &str, topology: Topology) -> Result<Self, SinkError> {
        let connection = Connection::connect(url, ConnectionProperties::default()).await?;
        let channel = connection.create_channel().await?;
        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await?;

        info!("connected to RabbitMQ");

        Ok(Self {
            connection,
            channel,
            topology,
        })
    }

    /// Declare the durable exchange and queues, and bind the ingress queue to the exchange.
    pub async fn declare(&self) -> Result<(), SinkError> {
        let durable_exchange = ExchangeDeclareOptions {
            durable: true,
            ..ExchangeDeclareOptions::default()
        };

        self.channel
            .exchange_declare(
                &self.topology.exchange,
                ExchangeKind::Direct,
                durable_exchange,
                FieldTable::default(),
            )
            .await?;

        for queue in [&self.topology.queue, &self.topology.stats_queue] {
            self.channel
                .queue_declare(
                    queue,
                    QueueDeclareOptions {
                        durable: true,
                        ..QueueDeclareOptions::default()
                    },
                    FieldTable::default(),
                )
                .await?;
        }

        self.channel
            .queue_bind(
                &self.topology.queue,
                &self.topology.exchange,
                &self.topology.routing_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await?;

        info!(
            exchange = %self.topology.exchange,
            queue = %self.topology.queue,
            stats_queue = %self.topology.stats_queue,
            "declared RabbitMQ topology"
        );

        Ok(())
    }

    /// Start consuming the ingress queue. Deliveries are acknowledged by the broker on send.
    pub async fn consume(&self, consumer_tag: &str) -> Result<ProfileConsumer, SinkError> {
        let consumer = self
            .channel
            .basic_consume(
                &self.topology.queue,
                consumer_tag,
                BasicConsumeOptions {
                    no_ack: true,
                    ..BasicConsumeOptions::default()
                },
                FieldTable::default(),
            )
            .await?;

        Ok(ProfileConsumer { inner: consumer })
    }

    pub fn publisher(&self) -> AmqpPublisher {
        AmqpPublisher {
            channel: self.channel.clone(),
            exchange: self.topology.exchange.clone(),
            routing_key: self.topology.routing_key.clone(),
            stats_queue: self.topology.stats_queue.clone(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connection.status().connected() && self.channel.status().connected()
    }

    pub async fn close(&self) -> Result<(), SinkError> {
        self.channel.close(200, "shutting down").await?;
        self.connection.close(200, "shutting down").await?;
        Ok(())
    }
}

/// A message read from the ingress queue.
#[derive(Debug)]
pub enum Ingress {
    Event(ProfileEvent),
    /// The body could not be decoded into a `ProfileEvent`.
    Malformed(serde_json::Error),
}

pub struct ProfileConsumer {
    inner: lapin::Consumer,
}

impl ProfileConsumer {
    /// Wait for the next delivery. Returns `None` once the broker cancels the consumer.
    pub async fn next(&mut self) -> Option<Result<Ingress, SinkError>> {
        let delivery = match self.inner.next().await? {
            Ok(delivery) => delivery,
            Err(error) => return Some(Err(error.into())),
        };

        Some(Ok(match ProfileEvent::from_slice(&delivery.data) {
            Ok(event) => Ingress::Event(event),
            Err(error) => Ingress::Malformed(error),
        }))
    }
}

/// Publishes enriched results to the exchange and stats snapshots to the stats queue.
#[derive(Clone)]
pub struct AmqpPublisher {
    channel: Channel,
    exchange: String,
    routing_key: String,
    stats_queue: String,
}

impl AmqpPublisher {
    async fn publish_json(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
    ) -> Result<(), SinkError> {
        if !self.channel.status().connected() {
            return Err(SinkError::ChannelClosed);
        }

        let confirmation = self
            .channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions::default(),
                payload,
                BasicProperties::default().with_content_type("application/json".into()),
            )
            .await?
            .await?;

        check_confirmation(confirmation, exchange, routing_key)
    }
}

/// The channel is in confirm mode, so every publish is either acked or nacked by the broker.
fn check_confirmation(
    confirmation: Confirmation,
    exchange: &str,
    routing_key: &str,
) -> Result<(), SinkError> {
    match confirmation {
        Confirmation::Nack(_) => Err(SinkError::NackError {
            exchange: exchange.to_owned(),
            routing_key: routing_key.to_owned(),
        }),
        Confirmation::Ack(_) | Confirmation::NotRequested => Ok(()),
    }
}

#[async_trait]
impl ResultSink for AmqpPublisher {
    async fn publish(&self, result: &EnrichedResult) -> Result<(), SinkError> {
        let payload = serde_json::to_vec(result)?;

        self.publish_json(&self.exchange, &self.routing_key, &payload)
            .await?;

        debug!(profile_id = result.profile_id, "result published");

        Ok(())
    }
}

#[async_trait]
impl StatsSink for AmqpPublisher {
    async fn publish_stats(&self, snapshot: StatsSnapshot) -> Result<(), SinkError> {
        let payload = serde_json::to_vec(&snapshot)?;

        // The default exchange routes on queue name.
        self.publish_json("", &self.stats_queue, &payload).await?;

        debug!(count = snapshot.count, "stats published");

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nacked_publish_is_an_error() {
        match check_confirmation(Confirmation::Nack(None), "", "stats_queue") {
            Err(SinkError::NackError {
                exchange,
                routing_key,
            }) => {
                assert_eq!(exchange, "");
                assert_eq!(routing_key, "stats_queue");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn acked_publish_is_ok() {
        assert!(
            check_confirmation(Confirmation::Ack(None), "profile_exchange", "profile_key").is_ok()
        );
    }
}
