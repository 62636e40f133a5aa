use bytes::Bytes;
use partition_sink_kafka::Record;

/// Per-message context travelling with an envelope.
///
/// Reserved for request-scoped data (trace ids, deadlines). Nothing reads it yet.
#[derive(Debug, Clone, Default)]
pub struct MessageContext {}

/// One unit of work handed from the run loop to a worker
#[derive(Debug, Clone)]
pub struct Envelope {
    pub record: Record,
    pub context: MessageContext,
}

impl Envelope {
    pub fn new(record: Record) -> Self {
        Self {
            record,
            context: MessageContext::default(),
        }
    }

    pub fn payload(&self) -> &Bytes {
        &self.record.payload
    }

    /// Payload for log lines, invalid UTF-8 replaced
    pub fn payload_lossy(&self) -> String {
        String::from_utf8_lossy(&self.record.payload).into_owned()
    }
}

impl From<Record> for Envelope {
    fn from(record: Record) -> Self {
        Self::new(record)
    }
}
