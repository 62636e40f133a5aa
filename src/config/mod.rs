//! Configuration for the bridge.
//!
//! Settings come from a JSON file whose field names match the deployed
//! `config.json` files (`ClientID`, `KafkaBrokers`, ...), optionally overridden
//! on the command line. Everything is validated before any resource is opened.

mod duration;

pub use duration::parse_duration;

use crate::error::{Error, Result};
use clap::Parser;
use partition_sink_kafka::{PullerConfig, StartOffset};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default location of the configuration file
pub const DEFAULT_CONFIG_PATH: &str = "config.json";

/// Bridge configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Client identifier reported to the brokers
    #[serde(rename = "ClientID")]
    pub client_id: String,
    /// Kafka brokers
    #[serde(rename = "KafkaBrokers")]
    pub brokers: Vec<String>,
    /// Name used for this consumer in logs and as the librdkafka group id
    #[serde(rename = "KafkaConsumerGroup")]
    pub group_id: String,
    /// Topic to read
    #[serde(rename = "KafkaTopics")]
    pub topic: String,
    /// Partition of `topic` to read
    #[serde(rename = "Partition")]
    pub partition: i32,
    /// Start offset: `-2` oldest, `-1` newest, otherwise absolute
    #[serde(rename = "Offset")]
    pub offset: i64,
    /// Number of workers writing to the output file. `0` is treated as `1`.
    #[serde(rename = "MaxProcessors")]
    pub max_processors: usize,
    /// File the payloads are appended to
    #[serde(rename = "OutputFilePath")]
    pub output_path: String,
    /// Log file. Logs go to stderr when empty.
    #[serde(rename = "LogFilePath")]
    pub log_path: String,
    /// How long the process waits for shutdown acknowledgements
    #[serde(rename = "ShutdownTimeout")]
    pub shutdown_timeout: String,
    /// How long in-flight messages may take to finish once the loop stops
    #[serde(rename = "DrainTimeout")]
    pub drain_timeout: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            client_id: "".to_string(),
            brokers: vec![],
            group_id: "".to_string(),
            topic: "".to_string(),
            partition: 0,
            offset: 0,
            max_processors: 1,
            output_path: "".to_string(),
            log_path: "".to_string(),
            shutdown_timeout: "5s".to_string(),
            drain_timeout: "10s".to_string(),
        }
    }
}

/// Command-line overrides for values from the configuration file
#[derive(Debug, Clone, Default, Parser)]
pub struct Overrides {
    /// Kafka brokers (comma-separated or multiple --brokers)
    #[arg(long, value_delimiter = ',', env = "PARTITION_SINK_BROKERS")]
    pub brokers: Vec<String>,
    /// Topic to read
    #[arg(long, env = "PARTITION_SINK_TOPIC")]
    pub topic: Option<String>,
    /// Partition to read
    #[arg(long)]
    pub partition: Option<i32>,
    /// Start offset (-2 oldest, -1 newest, otherwise absolute)
    #[arg(long, allow_negative_numbers = true)]
    pub offset: Option<i64>,
    /// Number of workers
    #[arg(long)]
    pub workers: Option<usize>,
    /// Output file
    #[arg(long, env = "PARTITION_SINK_OUTPUT")]
    pub output: Option<String>,
    /// Log file
    #[arg(long)]
    pub log_file: Option<String>,
}

impl Config {
    /// Read configuration from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("Reading {} failed: {e}", path.display()))
        })?;
        Self::from_json(&contents).map_err(|e| match e {
            Error::Configuration(msg) => {
                Error::Configuration(format!("Reading {} failed: {msg}", path.display()))
            }
            other => other,
        })
    }

    /// Parse configuration from a JSON document
    pub fn from_json(contents: &str) -> Result<Self> {
        serde_json::from_str(contents).map_err(|e| Error::Configuration(e.to_string()))
    }

    /// Replace file values with the ones given on the command line
    pub fn apply(&mut self, overrides: &Overrides) {
        if !overrides.brokers.is_empty() {
            self.brokers = overrides.brokers.clone();
        }
        if let Some(topic) = &overrides.topic {
            self.topic = topic.clone();
        }
        if let Some(partition) = overrides.partition {
            self.partition = partition;
        }
        if let Some(offset) = overrides.offset {
            self.offset = offset;
        }
        if let Some(workers) = overrides.workers {
            self.max_processors = workers;
        }
        if let Some(output) = &overrides.output {
            self.output_path = output.clone();
        }
        if let Some(log_file) = &overrides.log_file {
            self.log_path = log_file.clone();
        }
    }

    /// Names of required fields that are empty
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.client_id.is_empty() {
            missing.push("ClientID");
        }
        if self.brokers.iter().all(|b| b.trim().is_empty()) {
            missing.push("KafkaBrokers");
        }
        if self.output_path.is_empty() {
            missing.push("OutputFilePath");
        }
        if self.topic.is_empty() {
            missing.push("KafkaTopics");
        }
        missing
    }

    /// Check the configuration is complete and well formed
    pub fn validate(&self) -> Result<()> {
        let missing = self.missing_fields();
        if !missing.is_empty() {
            return Err(Error::Configuration(format!(
                "missing required field(s): {}",
                missing.join(", ")
            )));
        }
        if self.partition < 0 {
            return Err(Error::Configuration(format!(
                "Partition must not be negative, got {}",
                self.partition
            )));
        }
        self.start_offset()?;
        self.shutdown_timeout()?;
        self.drain_timeout()?;
        Ok(())
    }

    pub fn start_offset(&self) -> Result<StartOffset> {
        Ok(StartOffset::from_raw(self.offset)?)
    }

    pub fn shutdown_timeout(&self) -> Result<Duration> {
        parse_duration(&self.shutdown_timeout)
            .map_err(|e| Error::Configuration(format!("ShutdownTimeout: {e:#}")))
    }

    pub fn drain_timeout(&self) -> Result<Duration> {
        parse_duration(&self.drain_timeout)
            .map_err(|e| Error::Configuration(format!("DrainTimeout: {e:#}")))
    }

    pub fn output_path(&self) -> PathBuf {
        PathBuf::from(&self.output_path)
    }

    /// Name of this consumer in logs: the consumer group, or the client id
    pub fn consumer_name(&self) -> &str {
        if self.group_id.is_empty() {
            &self.client_id
        } else {
            &self.group_id
        }
    }

    /// Settings for the Kafka puller
    pub fn puller_config(&self) -> Result<PullerConfig> {
        Ok(PullerConfig {
            brokers: self
                .brokers
                .iter()
                .map(|b| b.trim().to_string())
                .filter(|b| !b.is_empty())
                .collect(),
            client_id: self.client_id.clone(),
            group_id: self.group_id.clone(),
            topic: self.topic.clone(),
            partition: self.partition,
            offset: self.start_offset()?,
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::{Arc, Mutex};

    fn valid() -> Config {
        Config {
            client_id: "bridge".to_string(),
            brokers: vec!["localhost:9092".to_string()],
            topic: "events".to_string(),
            output_path: "/tmp/events.log".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_parse_original_field_names() {
        let json = r#"{
            "ClientID": "bridge",
            "KafkaBrokers": ["k1:9092", "k2:9092"],
            "KafkaConsumerGroup": "archivers",
            "KafkaTopics": "events",
            "OutputFilePath": "events.log",
            "LogFilePath": "bridge.log",
            "MaxProcessors": 4,
            "Offset": -2
        }"#;
        let config = Config::from_json(json).unwrap();
        assert_eq!(config.client_id, "bridge");
        assert_eq!(config.brokers, vec!["k1:9092", "k2:9092"]);
        assert_eq!(config.group_id, "archivers");
        assert_eq!(config.topic, "events");
        assert_eq!(config.output_path, "events.log");
        assert_eq!(config.log_path, "bridge.log");
        assert_eq!(config.max_processors, 4);
        assert_eq!(config.offset, -2);
        // Not in the file: defaults
        assert_eq!(config.partition, 0);
        assert_eq!(config.shutdown_timeout, "5s");
        config.validate().unwrap();
    }

    #[test]
    fn test_parse_invalid_json() {
        let result = Config::from_json("{ not json");
        assert!(matches!(result, Err(Error::Configuration(_))));
    }

    #[test]
    fn test_from_file_missing() {
        let result = Config::from_file("/nonexistent/config.json");
        assert!(matches!(result, Err(Error::Configuration(_))));
    }

    #[test]
    fn test_from_file() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("config.json");
        std::fs::write(&path, serde_json::to_string(&valid()).unwrap()).unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config, valid());
    }

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_from_file_logs_nothing() {
        // Loading happens before the log destination is known
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("config.json");
        std::fs::write(&path, serde_json::to_string(&valid()).unwrap()).unwrap();

        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::TRACE)
            .with_writer(move || writer.clone())
            .finish();
        tracing::subscriber::with_default(subscriber, || {
            Config::from_file(&path).unwrap();
            let _ = Config::from_file("/nonexistent/config.json");
        });

        assert!(captured.0.lock().unwrap().is_empty());
    }

    #[test]
    fn test_missing_fields_each() {
        let cases: Vec<(&str, fn(&mut Config))> = vec![
            ("ClientID", |c| c.client_id.clear()),
            ("KafkaBrokers", |c| c.brokers.clear()),
            ("OutputFilePath", |c| c.output_path.clear()),
            ("KafkaTopics", |c| c.topic.clear()),
        ];
        for (field, clear) in cases {
            let mut config = valid();
            clear(&mut config);
            assert_eq!(config.missing_fields(), vec![field]);
            let err = config.validate().unwrap_err();
            assert!(err.to_string().contains(field), "{err}");
        }
    }

    #[test]
    fn test_blank_brokers_are_missing() {
        let mut config = valid();
        config.brokers = vec!["  ".to_string()];
        assert_eq!(config.missing_fields(), vec!["KafkaBrokers"]);
    }

    #[test]
    fn test_invalid_offset_rejected() {
        let mut config = valid();
        config.offset = -5;
        assert!(matches!(config.validate(), Err(Error::Configuration(_))));
    }

    #[test]
    fn test_negative_partition_rejected() {
        let mut config = valid();
        config.partition = -1;
        assert!(matches!(config.validate(), Err(Error::Configuration(_))));
    }

    #[test]
    fn test_invalid_timeout_rejected() {
        let mut config = valid();
        config.drain_timeout = "a while".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("DrainTimeout"));
    }

    #[test]
    fn test_overrides() {
        let mut config = valid();
        let overrides = Overrides::parse_from([
            "partition-sink",
            "--brokers",
            "a:9092,b:9092",
            "--topic",
            "audit",
            "--offset",
            "-1",
            "--workers",
            "8",
        ]);
        config.apply(&overrides);

        assert_eq!(config.brokers, vec!["a:9092", "b:9092"]);
        assert_eq!(config.topic, "audit");
        assert_eq!(config.offset, -1);
        assert_eq!(config.max_processors, 8);
        assert_eq!(config.output_path, "/tmp/events.log");
    }

    #[test]
    fn test_puller_config() {
        let mut config = valid();
        config.brokers = vec![" k1:9092 ".to_string(), "".to_string()];
        config.offset = 10;
        config.partition = 2;

        let puller = config.puller_config().unwrap();
        assert_eq!(puller.brokers, vec!["k1:9092"]);
        assert_eq!(puller.topic, "events");
        assert_eq!(puller.partition, 2);
        assert_eq!(puller.offset, StartOffset::At(10));
    }

    #[test]
    fn test_consumer_name() {
        let mut config = valid();
        assert_eq!(config.consumer_name(), "bridge");
        config.group_id = "archivers".to_string();
        assert_eq!(config.consumer_name(), "archivers");
    }
}
