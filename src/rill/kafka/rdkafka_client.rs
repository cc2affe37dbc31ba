//! librdkafka-backed implementation of the pluggable client interface.
//!
//! Wraps an `rdkafka::consumer::BaseConsumer`: a plain, poll-driven client
//! with no async machinery of its own, which is exactly what the dedicated
//! client thread expects to drive.

use crate::rill::kafka::client::{ClientFactory, ClientRecord, ConsumerClient};
use crate::rill::kafka::consumer_config::ConsumerConfig;
use crate::rill::kafka::headers::Headers;
use crate::rill::kafka::kafka_error::ClientError;
use crate::rill::kafka::topic_partition::TopicPartition;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{BaseConsumer, CommitMode, Consumer};
use rdkafka::message::{Headers as RdHeaders, Message as RdMessage};
use rdkafka::{Offset, TopicPartitionList};
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

/// Upper bound on the records drained from librdkafka per poll cycle.
const MAX_POLL_RECORDS: usize = 500;

/// Kafka client backed by `rdkafka::consumer::BaseConsumer`.
pub struct RdKafkaClient {
    consumer: BaseConsumer,
    seek_timeout: Duration,
}

/// Constructs an [`RdKafkaClient`] from the consumer configuration.
///
/// Auto-commit is disabled: offsets are committed only through the
/// committable handles attached to consumed records.
pub struct RdKafkaClientFactory;

impl ClientFactory for RdKafkaClientFactory {
    type Client = RdKafkaClient;

    fn create(&self, config: &ConsumerConfig) -> Result<RdKafkaClient, ClientError> {
        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", &config.brokers)
            .set("group.id", &config.group_id)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", config.auto_offset_reset.as_str());
        if let Some(client_id) = &config.client_id {
            client_config.set("client.id", client_id);
        }
        for (key, value) in &config.custom_config {
            client_config.set(key, value);
        }
        let consumer: BaseConsumer = client_config
            .create()
            .map_err(|e| ClientError::from_source("failed to create kafka consumer", e))?;
        Ok(RdKafkaClient {
            consumer,
            seek_timeout: config.request_timeout,
        })
    }
}

impl ConsumerClient for RdKafkaClient {
    fn subscribe(&mut self, topics: &[String]) -> Result<(), ClientError> {
        let refs: Vec<&str> = topics.iter().map(String::as_str).collect();
        self.consumer
            .subscribe(&refs)
            .map_err(|e| ClientError::from_source("subscribe failed", e))
    }

    fn subscribe_pattern(&mut self, pattern: &str) -> Result<(), ClientError> {
        // librdkafka treats topics starting with '^' as regex patterns.
        let topic = if pattern.starts_with('^') {
            pattern.to_string()
        } else {
            format!("^{}", pattern)
        };
        self.consumer
            .subscribe(&[topic.as_str()])
            .map_err(|e| ClientError::from_source("subscribe to pattern failed", e))
    }

    fn unsubscribe(&mut self) -> Result<(), ClientError> {
        self.consumer.unsubscribe();
        Ok(())
    }

    fn assignment(&mut self) -> Result<BTreeSet<TopicPartition>, ClientError> {
        let assigned = self
            .consumer
            .assignment()
            .map_err(|e| ClientError::from_source("assignment lookup failed", e))?;
        Ok(assigned
            .elements()
            .iter()
            .map(|elem| TopicPartition::new(elem.topic(), elem.partition()))
            .collect())
    }

    fn seek(&mut self, tp: &TopicPartition, offset: i64) -> Result<(), ClientError> {
        self.consumer
            .seek(
                tp.topic(),
                tp.partition(),
                Offset::Offset(offset),
                self.seek_timeout,
            )
            .map_err(|e| ClientError::from_source(format!("seek on {} failed", tp), e))
    }

    fn poll(&mut self, timeout: Duration) -> Result<Vec<ClientRecord>, ClientError> {
        let mut records = Vec::new();
        match self.consumer.poll(timeout) {
            None => return Ok(records),
            Some(Err(e)) => return Err(ClientError::from_source("poll failed", e)),
            Some(Ok(message)) => records.push(to_client_record(&message)),
        }
        // Drain whatever else is already buffered, without waiting again.
        while records.len() < MAX_POLL_RECORDS {
            match self.consumer.poll(Duration::ZERO) {
                None => break,
                Some(Ok(message)) => records.push(to_client_record(&message)),
                Some(Err(e)) => {
                    if records.is_empty() {
                        return Err(ClientError::from_source("poll failed", e));
                    }
                    // Deliver what was drained; the error resurfaces on the
                    // next poll.
                    break;
                }
            }
        }
        Ok(records)
    }

    fn beginning_offsets(
        &mut self,
        partitions: &BTreeSet<TopicPartition>,
        timeout: Duration,
    ) -> Result<HashMap<TopicPartition, i64>, ClientError> {
        let mut offsets = HashMap::with_capacity(partitions.len());
        for tp in partitions {
            let (low, _high) = self
                .consumer
                .fetch_watermarks(tp.topic(), tp.partition(), timeout)
                .map_err(|e| {
                    ClientError::from_source(format!("watermark lookup on {} failed", tp), e)
                })?;
            offsets.insert(tp.clone(), low);
        }
        Ok(offsets)
    }

    fn end_offsets(
        &mut self,
        partitions: &BTreeSet<TopicPartition>,
        timeout: Duration,
    ) -> Result<HashMap<TopicPartition, i64>, ClientError> {
        let mut offsets = HashMap::with_capacity(partitions.len());
        for tp in partitions {
            let (_low, high) = self
                .consumer
                .fetch_watermarks(tp.topic(), tp.partition(), timeout)
                .map_err(|e| {
                    ClientError::from_source(format!("watermark lookup on {} failed", tp), e)
                })?;
            offsets.insert(tp.clone(), high);
        }
        Ok(offsets)
    }

    fn commit_sync(&mut self, offsets: &HashMap<TopicPartition, i64>) -> Result<(), ClientError> {
        let mut list = TopicPartitionList::new();
        for (tp, offset) in offsets {
            list.add_partition_offset(tp.topic(), tp.partition(), Offset::Offset(*offset))
                .map_err(|e| ClientError::from_source("invalid commit offset", e))?;
        }
        self.consumer
            .commit(&list, CommitMode::Sync)
            .map_err(|e| ClientError::from_source("offset commit failed", e))
    }

    fn close(&mut self, _timeout: Duration) -> Result<(), ClientError> {
        self.consumer.unsubscribe();
        Ok(())
    }
}

fn to_client_record(message: &rdkafka::message::BorrowedMessage<'_>) -> ClientRecord {
    let timestamp = match message.timestamp() {
        rdkafka::Timestamp::CreateTime(t) | rdkafka::Timestamp::LogAppendTime(t) => Some(t),
        rdkafka::Timestamp::NotAvailable => None,
    };
    let headers = message
        .headers()
        .map(headers_from_rdkafka)
        .unwrap_or_default();
    ClientRecord {
        topic: message.topic().to_string(),
        partition: message.partition(),
        offset: message.offset(),
        key: message.key().map(<[u8]>::to_vec),
        value: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
        timestamp,
        headers,
    }
}

fn headers_from_rdkafka<H: RdHeaders>(kafka_headers: &H) -> Headers {
    let mut headers = Headers::with_capacity(kafka_headers.count());
    for i in 0..kafka_headers.count() {
        let header = kafka_headers.get(i);
        match header.value {
            Some(value) => headers.push(header.key, value),
            None => headers.push_null(header.key),
        }
    }
    headers
}
