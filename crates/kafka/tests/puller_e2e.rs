//! Puller E2E test against a real broker
//!
//! Test flow:
//! 1. Create a single-partition topic
//! 2. Produce a few records
//! 3. Connect a puller from the oldest offset and read them back in order
//!
//! Needs a broker at `kafka:9092`, run with `cargo test -- --ignored`.

use partition_sink_kafka::{Puller, PullerConfig, StartOffset};
use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::DefaultClientContext;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::ClientConfig;
use std::time::Duration;

/// Kafka broker address for testing
const KAFKA_BROKER: &str = "kafka:9092";

async fn create_topic(topic: &str) -> Result<(), Box<dyn std::error::Error>> {
    let admin_client: AdminClient<DefaultClientContext> = ClientConfig::new()
        .set("bootstrap.servers", KAFKA_BROKER)
        .create()?;

    let new_topic = NewTopic::new(topic, 1, TopicReplication::Fixed(1));
    let opts = AdminOptions::new().operation_timeout(Some(Duration::from_secs(5)));
    for result in admin_client.create_topics(&[new_topic], &opts).await? {
        if let Err((topic_name, err)) = result {
            if !err.to_string().contains("already exists") {
                return Err(format!("Failed to create topic {topic_name}: {err}").into());
            }
        }
    }
    Ok(())
}

#[tokio::test]
#[ignore = "requires a Kafka broker at kafka:9092"]
async fn test_puller_reads_partition_from_oldest() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter("partition_sink_kafka=debug")
        .try_init()
        .ok();

    let topic = format!("test-puller-{}", uuid::Uuid::new_v4());
    create_topic(&topic).await?;

    let producer: FutureProducer = ClientConfig::new()
        .set("bootstrap.servers", KAFKA_BROKER)
        .set("message.timeout.ms", "5000")
        .create()?;
    for i in 0..3 {
        let payload = format!("line-{i}");
        producer
            .send(
                FutureRecord::<(), _>::to(&topic).payload(&payload),
                Duration::from_secs(5),
            )
            .await
            .map_err(|(e, _)| e)?;
    }

    let config = PullerConfig {
        brokers: vec![KAFKA_BROKER.to_string()],
        client_id: "puller-e2e".to_string(),
        topic: topic.clone(),
        offset: StartOffset::Beginning,
        ..Default::default()
    };
    let mut puller = Puller::connect(&config)?;

    let (messages, _errors) = puller.sources();
    for i in 0..3 {
        let record = tokio::time::timeout(Duration::from_secs(10), messages.recv())
            .await?
            .ok_or("record source closed")?;
        assert_eq!(record.topic, topic);
        assert_eq!(record.offset, i);
        assert_eq!(&record.payload[..], format!("line-{i}").as_bytes());
    }

    puller.close().await;
    Ok(())
}

#[tokio::test]
#[ignore = "requires a Kafka broker at kafka:9092"]
async fn test_puller_rejects_unknown_partition() -> Result<(), Box<dyn std::error::Error>> {
    let topic = format!("test-puller-{}", uuid::Uuid::new_v4());
    create_topic(&topic).await?;

    let config = PullerConfig {
        brokers: vec![KAFKA_BROKER.to_string()],
        topic,
        partition: 7,
        ..Default::default()
    };
    let result = Puller::connect(&config);
    assert!(matches!(
        result,
        Err(partition_sink_kafka::Error::PartitionNotFound { partition: 7, .. })
    ));
    Ok(())
}
