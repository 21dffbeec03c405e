//! RabbitMQ access for image jobs.
//!
//! One durable direct exchange, one durable queue, one routing key.
//! Messages are persistent JSON payloads of [`ImageProcessJobData`] and are
//! acknowledged manually by the dispatcher.

use lapin::options::{
    BasicConsumeOptions, BasicPublishOptions, ExchangeDeclareOptions, QueueBindOptions,
    QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, Consumer, ExchangeKind};

use crate::models::job::ImageProcessJobData;

const IMAGE_EXCHANGE: &str = "imageExchange";
const IMAGE_QUEUE: &str = "imageQueue";
const IMAGE_KEY: &str = "imageKey";

/// AMQP persistent delivery mode.
const PERSISTENT: u8 = 2;

pub struct ImageQueue {
    connection: Connection,
    channel: Channel,
}

impl ImageQueue {
    /// Connect a publishing side: exchange and queue are declared so
    /// publishes never race the consumer's declarations.
    pub async fn publisher(url: &str) -> Result<Self, QueueError> {
        Self::connect(url).await
    }

    /// Connect a consuming side: binds the queue and escalates connection
    /// errors. In development they are logged; in production they terminate
    /// the process so the orchestrator restarts it.
    pub async fn consumer(url: &str, dev: bool) -> Result<Self, QueueError> {
        let queue = Self::connect(url).await?;

        queue
            .channel
            .queue_bind(
                IMAGE_QUEUE,
                IMAGE_EXCHANGE,
                IMAGE_KEY,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await?;

        queue.connection.on_error(move |err| {
            if dev {
                tracing::error!(error = %err, "rabbitmq connection error");
            } else {
                tracing::error!(error = %err, "rabbitmq connection error, terminating");
                std::process::exit(1);
            }
        });

        Ok(queue)
    }

    async fn connect(url: &str) -> Result<Self, QueueError> {
        let connection = Connection::connect(url, ConnectionProperties::default()).await?;
        let channel = connection.create_channel().await?;

        channel
            .exchange_declare(
                IMAGE_EXCHANGE,
                ExchangeKind::Direct,
                ExchangeDeclareOptions {
                    durable: true,
                    ..ExchangeDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await?;

        channel
            .queue_declare(
                IMAGE_QUEUE,
                QueueDeclareOptions {
                    durable: true,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await?;

        Ok(Self {
            connection,
            channel,
        })
    }

    /// Publish a job as a persistent JSON message.
    pub async fn publish(&self, job: &ImageProcessJobData) -> Result<(), QueueError> {
        let payload = serde_json::to_vec(job)?;

        self.channel
            .basic_publish(
                IMAGE_EXCHANGE,
                IMAGE_KEY,
                BasicPublishOptions::default(),
                &payload,
                BasicProperties::default()
                    .with_content_type("application/json".into())
                    .with_delivery_mode(PERSISTENT),
            )
            .await?
            .await?;

        Ok(())
    }

    /// Start consuming raw deliveries; acknowledgement is the caller's job.
    pub async fn consume(&self) -> Result<Consumer, QueueError> {
        self.channel
            .basic_consume(
                IMAGE_QUEUE,
                "",
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(QueueError::Amqp)
    }

    pub fn is_connected(&self) -> bool {
        self.connection.status().connected()
    }

    pub async fn close(&self) {
        let _ = self.channel.close(200, "shutdown").await;
        let _ = self.connection.close(200, "shutdown").await;
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("AMQP error: {0}")]
    Amqp(#[from] lapin::Error),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}
