use crate::error::{Error, Result};
use crate::offset::StartOffset;
use bytes::Bytes;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer as RdkafkaConsumer, StreamConsumer as RdkafkaStreamConsumer};
use rdkafka::message::{BorrowedMessage as RdkafkaBorrowedMessage, Message as RdkafkaMessage};
use rdkafka::TopicPartitionList;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, warn};

/// Default capacity of the record and error channels
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Configuration for the partition puller
#[derive(Debug, Clone)]
pub struct PullerConfig {
    /// Kafka brokers
    pub brokers: Vec<String>,
    /// Client identifier reported to the brokers
    pub client_id: String,
    /// Group id handed to librdkafka.
    ///
    /// The puller assigns its partition directly and never commits, so the
    /// group only shows up in broker logs. Falls back to the client id when empty.
    pub group_id: String,
    /// Topic to read from
    pub topic: String,
    /// Partition of `topic` to read from
    pub partition: i32,
    /// Where to start reading
    pub offset: StartOffset,
    /// Capacity of the record and error channels
    pub channel_capacity: usize,
    /// Timeout for the metadata and watermark lookups done while connecting
    pub metadata_timeout: Duration,
}

impl Default for PullerConfig {
    fn default() -> Self {
        Self {
            brokers: vec!["localhost:9092".to_string()],
            client_id: "partition-sink".to_string(),
            group_id: "".to_string(),
            topic: "".to_string(),
            partition: 0,
            offset: StartOffset::End,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            metadata_timeout: Duration::from_secs(10),
        }
    }
}

impl PullerConfig {
    fn effective_group_id(&self) -> &str {
        if self.group_id.is_empty() {
            &self.client_id
        } else {
            &self.group_id
        }
    }
}

/// An owned Kafka record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Kafka topic
    pub topic: String,
    /// Kafka partition
    pub partition: i32,
    /// Kafka offset
    pub offset: i64,
    /// Message key (if any)
    pub key: Option<Bytes>,
    /// Message value. Tombstones carry an empty payload.
    pub payload: Bytes,
    /// Message timestamp (milliseconds since epoch)
    pub timestamp: Option<i64>,
}

impl Record {
    /// Build a record that did not come from a broker
    pub fn new(
        topic: impl Into<String>,
        partition: i32,
        offset: i64,
        payload: impl Into<Bytes>,
    ) -> Self {
        Self {
            topic: topic.into(),
            partition,
            offset,
            key: None,
            payload: payload.into(),
            timestamp: None,
        }
    }

    fn from_borrowed(msg: &RdkafkaBorrowedMessage) -> Self {
        Self {
            topic: msg.topic().to_string(),
            partition: msg.partition(),
            offset: msg.offset(),
            key: msg.key().map(Bytes::copy_from_slice),
            payload: msg.payload().map(Bytes::copy_from_slice).unwrap_or_default(),
            timestamp: msg.timestamp().to_millis(),
        }
    }
}

/// Reads a single partition and exposes what it reads as two sources:
/// records and broker errors.
///
/// Created with [`Puller::connect`]; the connection is driven by a background
/// pump task that stops on [`Puller::close`], or when the puller is dropped.
pub struct Puller {
    messages: mpsc::Receiver<Record>,
    errors: mpsc::Receiver<Error>,
    stop: DropGuard,
    pump: Option<JoinHandle<()>>,
}

impl Puller {
    /// Connect to the brokers and start reading the configured partition.
    ///
    /// Fails when the client cannot be created, when the partition does not
    /// exist, or when an absolute start offset lies outside the partition's
    /// watermarks. There is no retry.
    pub fn connect(config: &PullerConfig) -> Result<Self> {
        if config.brokers.is_empty() {
            return Err(Error::InvalidConfig("no brokers configured".to_string()));
        }
        if config.topic.is_empty() {
            return Err(Error::InvalidConfig("no topic configured".to_string()));
        }

        info!("Initializing Kafka consumer");
        let consumer: RdkafkaStreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", config.brokers.join(","))
            .set("client.id", &config.client_id)
            .set("group.id", config.effective_group_id())
            .set("enable.auto.commit", "false")
            .set("enable.auto.offset.store", "false")
            .set("enable.partition.eof", "false")
            .create()
            .map_err(|e| Error::Consumer(format!("Failed to create consumer: {e}")))?;
        info!("Kafka client {:?} running", config.client_id);

        check_partition(&consumer, config)?;

        let mut tpl = TopicPartitionList::new();
        tpl.add_partition_offset(&config.topic, config.partition, config.offset.to_rdkafka())
            .map_err(|e| Error::Consumer(format!("Failed to add partition offset: {e}")))?;
        consumer
            .assign(&tpl)
            .map_err(|e| Error::Consumer(format!("Failed to assign partition: {e}")))?;

        info!(
            "Consuming {}/{} from offset {}",
            config.topic, config.partition, config.offset
        );

        let capacity = config.channel_capacity.max(1);
        let (message_tx, messages) = mpsc::channel(capacity);
        let (error_tx, errors) = mpsc::channel(capacity);
        let stop = CancellationToken::new();
        let pump = tokio::spawn(pump(consumer, message_tx, error_tx, stop.clone()));

        Ok(Self {
            messages,
            errors,
            stop: stop.drop_guard(),
            pump: Some(pump),
        })
    }

    /// Build a puller over externally fed channels.
    ///
    /// The record source ends once every sender of `messages` is dropped.
    pub fn from_channels(messages: mpsc::Receiver<Record>, errors: mpsc::Receiver<Error>) -> Self {
        Self {
            messages,
            errors,
            stop: CancellationToken::new().drop_guard(),
            pump: None,
        }
    }

    /// Attach the task feeding this puller's channels.
    ///
    /// [`Puller::close`] waits for it, and the record source ending while it
    /// runs counts as a failure rather than the end of the data.
    pub fn with_pump(mut self, pump: JoinHandle<()>) -> Self {
        self.pump = Some(pump);
        self
    }

    /// Whether records only stop when the puller is closed.
    ///
    /// True for pullers driven by a pump task, such as those built by
    /// [`Puller::connect`].
    pub fn ends_only_on_close(&self) -> bool {
        self.pump.is_some()
    }

    /// Borrow the record source and the error source at the same time
    pub fn sources(&mut self) -> (&mut mpsc::Receiver<Record>, &mut mpsc::Receiver<Error>) {
        (&mut self.messages, &mut self.errors)
    }

    /// Stop reading and release the client.
    pub async fn close(self) {
        let Puller {
            messages,
            errors,
            stop,
            pump,
        } = self;

        drop(stop);
        drop(messages);
        drop(errors);

        if let Some(pump) = pump {
            if let Err(e) = pump.await {
                warn!("Kafka pump task ended abnormally: {e}");
            }
        }
        info!("Kafka puller closed");
    }
}

fn check_partition(consumer: &RdkafkaStreamConsumer, config: &PullerConfig) -> Result<()> {
    let metadata = consumer
        .fetch_metadata(Some(&config.topic), config.metadata_timeout)
        .map_err(|e| Error::Consumer(format!("Failed to fetch metadata: {e}")))?;

    let known = metadata
        .topics()
        .iter()
        .filter(|t| t.name() == config.topic && t.error().is_none())
        .flat_map(|t| t.partitions())
        .any(|p| p.id() == config.partition);
    if !known {
        return Err(Error::PartitionNotFound {
            topic: config.topic.clone(),
            partition: config.partition,
        });
    }

    let (low, high) = consumer
        .fetch_watermarks(&config.topic, config.partition, config.metadata_timeout)
        .map_err(|e| Error::Consumer(format!("Failed to fetch watermarks: {e}")))?;
    debug!(
        "Watermarks for {}/{}: low={low}, high={high}",
        config.topic, config.partition
    );

    if let StartOffset::At(offset) = config.offset {
        if offset < low || offset > high {
            return Err(Error::OffsetOutOfRange {
                topic: config.topic.clone(),
                partition: config.partition,
                offset,
                low,
                high,
            });
        }
    }

    Ok(())
}

async fn pump(
    consumer: RdkafkaStreamConsumer,
    messages: mpsc::Sender<Record>,
    errors: mpsc::Sender<Error>,
    stop: CancellationToken,
) {
    loop {
        let received = tokio::select! {
            _ = stop.cancelled() => break,
            received = consumer.recv() => received,
        };

        match received {
            Ok(msg) => {
                let record = Record::from_borrowed(&msg);
                drop(msg);
                tokio::select! {
                    _ = stop.cancelled() => break,
                    sent = messages.send(record) => {
                        if sent.is_err() {
                            break;
                        }
                    }
                }
            }
            Err(e) => {
                if let Err(mpsc::error::TrySendError::Full(e)) = errors.try_send(Error::Kafka(e)) {
                    warn!("Error channel full, dropping: {e}");
                }
            }
        }
    }
    debug!("Kafka pump stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PullerConfig::default();
        assert_eq!(config.partition, 0);
        assert_eq!(config.offset, StartOffset::End);
        assert_eq!(config.channel_capacity, DEFAULT_CHANNEL_CAPACITY);
    }

    #[test]
    fn test_group_id_falls_back_to_client_id() {
        let config = PullerConfig {
            client_id: "bridge-1".to_string(),
            ..Default::default()
        };
        assert_eq!(config.effective_group_id(), "bridge-1");

        let config = PullerConfig {
            client_id: "bridge-1".to_string(),
            group_id: "archivers".to_string(),
            ..Default::default()
        };
        assert_eq!(config.effective_group_id(), "archivers");
    }

    #[test]
    fn test_connect_rejects_missing_topic() {
        let result = Puller::connect(&PullerConfig::default());
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_connect_rejects_missing_brokers() {
        let config = PullerConfig {
            brokers: vec![],
            topic: "events".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            Puller::connect(&config),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn test_from_channels_sources() {
        let (message_tx, message_rx) = mpsc::channel(4);
        let (error_tx, error_rx) = mpsc::channel(4);
        let mut puller = Puller::from_channels(message_rx, error_rx);

        message_tx
            .send(Record::new("events", 0, 5, "hello"))
            .await
            .unwrap();
        error_tx
            .send(Error::Consumer("broker went away".to_string()))
            .await
            .unwrap();

        let (messages, errors) = puller.sources();
        let record = messages.recv().await.unwrap();
        assert_eq!(record.offset, 5);
        assert_eq!(&record.payload[..], b"hello");
        assert!(errors.recv().await.is_some());

        drop(message_tx);
        assert!(messages.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_pumped_puller_ends_only_on_close() {
        let (message_tx, message_rx) = mpsc::channel(1);
        let (_error_tx, error_rx) = mpsc::channel(1);
        let puller = Puller::from_channels(message_rx, error_rx);
        assert!(!puller.ends_only_on_close());

        let pump = tokio::spawn(async move { drop(message_tx) });
        let puller = puller.with_pump(pump);
        assert!(puller.ends_only_on_close());
        puller.close().await;
    }

    #[tokio::test]
    async fn test_close_drops_sources() {
        let (message_tx, message_rx) = mpsc::channel(1);
        let (error_tx, error_rx) = mpsc::channel(1);
        let puller = Puller::from_channels(message_rx, error_rx);

        puller.close().await;

        assert!(message_tx.is_closed());
        assert!(error_tx.is_closed());
    }
}
