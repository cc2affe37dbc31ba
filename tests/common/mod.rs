#![allow(dead_code)]

//! In-memory Kafka client for consumer tests.
//!
//! `MockBroker` holds per-partition logs, the group assignment and
//! committed offsets behind a mutex; `MockClient` implements the consumer
//! client interface against it. Assignment changes requested by a test
//! take effect at the next poll, mirroring how real clients surface
//! rebalances from inside their poll call.

use rillstream::{
    ClientError, ClientFactory, ClientRecord, ConsumerClient, ConsumerConfig, Headers,
    KafkaConsumer, StringDeserializer, TopicPartition,
};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

#[derive(Default)]
struct BrokerState {
    logs: HashMap<TopicPartition, Vec<StoredRecord>>,
    subscription: Vec<String>,
    pattern: Option<String>,
    assignment: BTreeSet<TopicPartition>,
    pending_assignment: Option<BTreeSet<TopicPartition>>,
    positions: HashMap<TopicPartition, i64>,
    committed: HashMap<TopicPartition, i64>,
    subscribe_error: Option<String>,
    closed: bool,
}

#[derive(Clone)]
struct StoredRecord {
    key: Option<Vec<u8>>,
    value: Vec<u8>,
    headers: Headers,
}

pub struct MockBroker {
    state: Mutex<BrokerState>,
}

impl MockBroker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(BrokerState::default()),
        })
    }

    /// Seeds empty logs so the partitions take part in assignment even
    /// before anything is produced to them.
    pub fn create_partitions(&self, topic: &str, partitions: i32) {
        let mut state = self.state.lock().unwrap();
        for partition in 0..partitions {
            state
                .logs
                .entry(TopicPartition::new(topic, partition))
                .or_default();
        }
    }

    /// Appends a record and returns its offset.
    pub fn produce(&self, topic: &str, partition: i32, key: Option<&str>, value: &str) -> i64 {
        self.produce_with_headers(topic, partition, key, value, Headers::new())
    }

    pub fn produce_with_headers(
        &self,
        topic: &str,
        partition: i32,
        key: Option<&str>,
        value: &str,
        headers: Headers,
    ) -> i64 {
        let mut state = self.state.lock().unwrap();
        let log = state
            .logs
            .entry(TopicPartition::new(topic, partition))
            .or_default();
        log.push(StoredRecord {
            key: key.map(|k| k.as_bytes().to_vec()),
            value: value.as_bytes().to_vec(),
            headers,
        });
        (log.len() - 1) as i64
    }

    /// Replaces the group assignment at the next poll.
    pub fn set_assignment(&self, partitions: impl IntoIterator<Item = TopicPartition>) {
        let mut state = self.state.lock().unwrap();
        state.pending_assignment = Some(partitions.into_iter().collect());
    }

    /// Fails the next subscribe call with the given message.
    pub fn fail_next_subscribe(&self, message: &str) {
        self.state.lock().unwrap().subscribe_error = Some(message.to_string());
    }

    pub fn committed(&self, tp: &TopicPartition) -> Option<i64> {
        self.state.lock().unwrap().committed.get(tp).copied()
    }

    pub fn subscription(&self) -> Vec<String> {
        self.state.lock().unwrap().subscription.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }

    fn matching_partitions(state: &BrokerState) -> BTreeSet<TopicPartition> {
        state
            .logs
            .keys()
            .filter(|tp| {
                if let Some(pattern) = &state.pattern {
                    tp.topic().starts_with(pattern.trim_start_matches('^'))
                } else {
                    state.subscription.iter().any(|t| t == tp.topic())
                }
            })
            .cloned()
            .collect()
    }
}

pub struct MockClient {
    broker: Arc<MockBroker>,
}

impl ConsumerClient for MockClient {
    fn subscribe(&mut self, topics: &[String]) -> Result<(), ClientError> {
        let mut state = self.broker.state.lock().unwrap();
        if let Some(message) = state.subscribe_error.take() {
            return Err(ClientError::new(message));
        }
        state.subscription = topics.to_vec();
        state.pattern = None;
        let matching = MockBroker::matching_partitions(&state);
        state.pending_assignment = Some(matching);
        Ok(())
    }

    fn subscribe_pattern(&mut self, pattern: &str) -> Result<(), ClientError> {
        let mut state = self.broker.state.lock().unwrap();
        state.subscription.clear();
        state.pattern = Some(pattern.to_string());
        let matching = MockBroker::matching_partitions(&state);
        state.pending_assignment = Some(matching);
        Ok(())
    }

    fn unsubscribe(&mut self) -> Result<(), ClientError> {
        let mut state = self.broker.state.lock().unwrap();
        state.subscription.clear();
        state.pattern = None;
        state.pending_assignment = Some(BTreeSet::new());
        Ok(())
    }

    fn assignment(&mut self) -> Result<BTreeSet<TopicPartition>, ClientError> {
        Ok(self.broker.state.lock().unwrap().assignment.clone())
    }

    fn seek(&mut self, tp: &TopicPartition, offset: i64) -> Result<(), ClientError> {
        let mut state = self.broker.state.lock().unwrap();
        state.positions.insert(tp.clone(), offset);
        Ok(())
    }

    fn poll(&mut self, _timeout: Duration) -> Result<Vec<ClientRecord>, ClientError> {
        let mut state = self.broker.state.lock().unwrap();
        if let Some(next) = state.pending_assignment.take() {
            state.assignment = next;
        }

        let mut drained = Vec::new();
        let assigned: Vec<TopicPartition> = state.assignment.iter().cloned().collect();
        for tp in assigned {
            let position = *state.positions.get(&tp).unwrap_or(&0);
            let records: Vec<(i64, StoredRecord)> = match state.logs.get(&tp) {
                Some(log) if (position as usize) < log.len() => log[position as usize..]
                    .iter()
                    .enumerate()
                    .map(|(i, record)| (position + i as i64, record.clone()))
                    .collect(),
                _ => continue,
            };
            state.positions.insert(tp.clone(), records.last().map(|(o, _)| o + 1).unwrap_or(position));
            for (offset, record) in records {
                drained.push(ClientRecord {
                    topic: tp.topic().to_string(),
                    partition: tp.partition(),
                    offset,
                    key: record.key,
                    value: record.value,
                    timestamp: Some(offset),
                    headers: record.headers,
                });
            }
        }
        Ok(drained)
    }

    fn beginning_offsets(
        &mut self,
        partitions: &BTreeSet<TopicPartition>,
        _timeout: Duration,
    ) -> Result<HashMap<TopicPartition, i64>, ClientError> {
        Ok(partitions.iter().map(|tp| (tp.clone(), 0)).collect())
    }

    fn end_offsets(
        &mut self,
        partitions: &BTreeSet<TopicPartition>,
        _timeout: Duration,
    ) -> Result<HashMap<TopicPartition, i64>, ClientError> {
        let state = self.broker.state.lock().unwrap();
        Ok(partitions
            .iter()
            .map(|tp| {
                let end = state.logs.get(tp).map(Vec::len).unwrap_or(0) as i64;
                (tp.clone(), end)
            })
            .collect())
    }

    fn commit_sync(&mut self, offsets: &HashMap<TopicPartition, i64>) -> Result<(), ClientError> {
        let mut state = self.broker.state.lock().unwrap();
        for (tp, offset) in offsets {
            state.committed.insert(tp.clone(), *offset);
        }
        Ok(())
    }

    fn close(&mut self, _timeout: Duration) -> Result<(), ClientError> {
        self.broker.state.lock().unwrap().closed = true;
        Ok(())
    }
}

pub struct MockClientFactory {
    broker: Arc<MockBroker>,
}

impl MockClientFactory {
    pub fn new(broker: Arc<MockBroker>) -> Self {
        Self { broker }
    }
}

impl ClientFactory for MockClientFactory {
    type Client = MockClient;

    fn create(&self, _config: &ConsumerConfig) -> Result<MockClient, ClientError> {
        Ok(MockClient {
            broker: self.broker.clone(),
        })
    }
}

/// Consumer configuration tuned for fast, deterministic tests.
pub fn test_config() -> ConsumerConfig {
    ConsumerConfig::new("localhost:9092", format!("test-group-{}", Uuid::new_v4()))
        .poll_interval(Duration::from_millis(10))
        .poll_timeout(Duration::from_millis(1))
        .fetch_timeout(Duration::from_millis(150))
        .close_timeout(Duration::from_secs(1))
}

pub async fn string_consumer(broker: &Arc<MockBroker>) -> KafkaConsumer<String, String> {
    KafkaConsumer::new(
        test_config(),
        MockClientFactory::new(broker.clone()),
        StringDeserializer,
        StringDeserializer,
    )
    .await
    .expect("consumer creation failed")
}
