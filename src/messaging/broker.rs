use super::job::{merge_until_first_end, JobMessage, JobQueue, JobStream};
use crate::config::MessageBrokerConfig;
use crate::error::Error;
use anyhow::Result;
use async_trait::async_trait;
use deadpool_lapin::{Config, Manager, Pool};
use futures_util::stream::{self, StreamExt};
use lapin::{
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, BasicQosOptions,
        ConfirmSelectOptions, ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
    },
    types::FieldTable,
    BasicProperties, Channel, ExchangeKind,
};
use log::{debug, error, info, warn};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Persistent delivery mode
const PERSISTENT: u8 = 2;

/// RabbitMQ job queue.
///
/// Jobs go to a durable direct exchange, routed by task name into one
/// durable queue per task. Publishing waits for the broker's confirm.
/// Deliveries are acknowledged as soon as they are received.
pub struct MessageBroker {
    /// Connection pool
    pool: Pool,
    config: MessageBrokerConfig,
    /// Unacknowledged deliveries per consumer channel
    prefetch: u16,
    /// Publishing channel, in confirm mode
    channel: Arc<Mutex<Option<Channel>>>,
}

impl MessageBroker {
    /// Connect and declare the exchange
    pub async fn new(config: MessageBrokerConfig, prefetch: u16) -> Result<Self> {
        let timeout = Some(Duration::from_millis(config.timeout_ms));
        let pool_config = Config {
            url: Some(config.uri.clone()),
            pool: Some(deadpool_lapin::PoolConfig {
                max_size: config.pool_size as usize,
                queue_mode: deadpool::managed::QueueMode::Fifo,
                timeouts: deadpool::managed::Timeouts {
                    wait: timeout,
                    create: timeout,
                    recycle: timeout,
                },
            }),
            connection_properties: lapin::ConnectionProperties::default(),
        };
        let pool = pool_config
            .create_pool(Some(deadpool_lapin::Runtime::Tokio1))
            .map_err(|e| Error::Broker(format!("Failed to create RabbitMQ pool: {}", e)))?;

        let broker = Self {
            pool,
            config,
            prefetch: prefetch.max(1),
            channel: Arc::new(Mutex::new(None)),
        };

        broker.init().await?;

        Ok(broker)
    }

    async fn init(&self) -> Result<()> {
        let channel = self.create_channel().await?;

        channel
            .exchange_declare(
                &self.config.exchange,
                ExchangeKind::Direct,
                ExchangeDeclareOptions {
                    durable: true,
                    auto_delete: false,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| Error::Broker(format!("Failed to declare exchange: {}", e)))?;

        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(|e| Error::Broker(format!("Failed to enable publisher confirms: {}", e)))?;

        *self.channel.lock().await = Some(channel);

        info!("RabbitMQ message broker initialized");

        Ok(())
    }

    async fn get_connection(&self) -> Result<deadpool::managed::Object<Manager>> {
        self.pool
            .get()
            .await
            .map_err(|e| Error::Broker(format!("Failed to get RabbitMQ connection: {}", e)).into())
    }

    async fn create_channel(&self) -> Result<Channel> {
        let conn = self.get_connection().await?;
        let channel = conn
            .create_channel()
            .await
            .map_err(|e| Error::Broker(format!("Failed to create RabbitMQ channel: {}", e)))?;
        Ok(channel)
    }

    /// Get the publishing channel or open a new one
    async fn get_channel(&self) -> Result<Channel> {
        let mut channel_guard = self.channel.lock().await;

        if let Some(channel) = &*channel_guard {
            if channel.status().connected() {
                return Ok(channel.clone());
            }
        }

        let channel = self.create_channel().await?;
        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(|e| Error::Broker(format!("Failed to enable publisher confirms: {}", e)))?;

        *channel_guard = Some(channel.clone());

        Ok(channel)
    }

    /// Name of the durable queue holding jobs for a task
    pub fn queue_name(&self, task: &str) -> String {
        format!("{}.{}", self.config.queue_prefix, task)
    }

    async fn declare_task_queue(&self, channel: &Channel, task: &str) -> Result<String> {
        let queue_name = self.queue_name(task);

        channel
            .queue_declare(
                &queue_name,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| Error::Broker(format!("Failed to declare queue: {}", e)))?;

        channel
            .queue_bind(
                &queue_name,
                &self.config.exchange,
                task,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| Error::Broker(format!("Failed to bind queue: {}", e)))?;

        debug!("Declared queue {} for task {}", queue_name, task);

        Ok(queue_name)
    }

    /// Consume one task queue on a dedicated channel
    async fn consume_task(&self, task: &str) -> Result<JobStream> {
        let channel = self.create_channel().await?;
        let queue_name = self.declare_task_queue(&channel, task).await?;

        channel
            .basic_qos(self.prefetch, BasicQosOptions::default())
            .await
            .map_err(|e| Error::Broker(format!("Failed to set prefetch: {}", e)))?;

        let consumer = channel
            .basic_consume(
                &queue_name,
                &format!("worker-{}", Uuid::new_v4()),
                BasicConsumeOptions {
                    no_ack: false,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| Error::Broker(format!("Failed to create consumer: {}", e)))?;

        info!("Consuming {} on queue {}", task, queue_name);

        // The channel travels with the stream so it stays open while consuming
        let state = (consumer, channel, queue_name);
        let jobs = stream::unfold(state, |(mut consumer, channel, queue_name)| async move {
            loop {
                let delivery = match consumer.next().await {
                    Some(Ok(delivery)) => delivery,
                    Some(Err(e)) => {
                        let err = Error::Broker(format!("Error receiving message: {}", e));
                        return Some((Err(err.into()), (consumer, channel, queue_name)));
                    }
                    None => {
                        warn!("Consumer on queue {} ended", queue_name);
                        return None;
                    }
                };

                if let Err(e) = delivery.ack(BasicAckOptions::default()).await {
                    error!("Failed to acknowledge message: {}", e);
                }

                match serde_json::from_slice::<JobMessage>(&delivery.data) {
                    Ok(job) => return Some((Ok(job), (consumer, channel, queue_name))),
                    Err(e) => error!("Failed to parse job message: {}", e),
                }
            }
        });

        Ok(Box::pin(jobs))
    }
}

#[async_trait]
impl JobQueue for MessageBroker {
    async fn enqueue(&self, task: &str, payload: Value) -> Result<()> {
        let job = JobMessage::new(task, payload);
        let message = serde_json::to_vec(&job)
            .map_err(|e| Error::Serialization(format!("Failed to serialize job: {}", e)))?;

        let channel = self.get_channel().await?;

        let confirmation = channel
            .basic_publish(
                &self.config.exchange,
                task,
                BasicPublishOptions::default(),
                &message,
                BasicProperties::default()
                    .with_content_type("application/json".into())
                    .with_delivery_mode(PERSISTENT),
            )
            .await
            .map_err(|e| Error::Broker(format!("Failed to publish job: {}", e)))?
            .await
            .map_err(|e| Error::Broker(format!("Failed to confirm job: {}", e)))?;

        if confirmation.is_nack() {
            return Err(Error::Broker(format!("Broker rejected job {}", job.id)).into());
        }

        debug!("Published job {} ({})", job.id, task);

        Ok(())
    }

    async fn consume(&self, tasks: &[String]) -> Result<JobStream> {
        let mut streams = Vec::with_capacity(tasks.len());
        for task in tasks {
            streams.push(self.consume_task(task).await?);
        }

        Ok(merge_until_first_end(streams))
    }
}

/// Connect to RabbitMQ
pub async fn create_message_broker(
    config: MessageBrokerConfig,
    prefetch: u16,
) -> Result<Arc<MessageBroker>> {
    let broker = MessageBroker::new(config, prefetch).await?;

    Ok(Arc::new(broker))
}
