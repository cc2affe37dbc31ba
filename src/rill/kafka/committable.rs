//! Committable handles attached to every consumed record.
//!
//! The consumer never commits offsets on its own. Each record is delivered
//! as a [`CommittableMessage`] carrying a [`CommittableOffset`], and the
//! caller decides when (and whether) to commit. Committing posts a request
//! to the consumer actor, which performs a synchronous commit on the
//! client thread.

use crate::rill::kafka::kafka_error::ConsumerError;
use crate::rill::kafka::message::Message;
use crate::rill::kafka::topic_partition::TopicPartition;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::oneshot;

type CommitFn = dyn Fn(
        HashMap<TopicPartition, i64>,
        oneshot::Sender<Result<(), ConsumerError>>,
    ) -> Result<(), ConsumerError>
    + Send
    + Sync;

/// Posts commit requests into the consumer actor.
///
/// The handle captures the typed request channel behind a plain function,
/// so committable offsets stay independent of the consumer's key and value
/// types.
#[derive(Clone)]
pub(crate) struct CommitHandle {
    commit: Arc<CommitFn>,
}

impl CommitHandle {
    pub(crate) fn new(commit: Arc<CommitFn>) -> Self {
        Self { commit }
    }

    pub(crate) async fn commit_offsets(
        &self,
        offsets: HashMap<TopicPartition, i64>,
    ) -> Result<(), ConsumerError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        (self.commit)(offsets, reply_tx)?;
        reply_rx
            .await
            .map_err(|_| ConsumerError::ConsumerShutdown)?
    }
}

/// Names the offset to commit on behalf of one consumed record.
///
/// Holds `(topic partition, record offset + 1, consumer group id)`:
/// committing acknowledges everything up to and including the record the
/// handle was taken from. Instances are immutable; [`commit`] may be
/// called any number of times.
///
/// [`commit`]: CommittableOffset::commit
#[derive(Clone)]
pub struct CommittableOffset {
    topic_partition: TopicPartition,
    offset: i64,
    consumer_group_id: Option<String>,
    commit: CommitHandle,
}

impl CommittableOffset {
    pub(crate) fn new(
        topic_partition: TopicPartition,
        offset: i64,
        consumer_group_id: Option<String>,
        commit: CommitHandle,
    ) -> Self {
        Self {
            topic_partition,
            offset,
            consumer_group_id,
            commit,
        }
    }

    /// Returns the topic partition the offset belongs to.
    pub fn topic_partition(&self) -> &TopicPartition {
        &self.topic_partition
    }

    /// Returns the offset that would be committed: one past the record
    /// this handle was taken from.
    pub fn offset(&self) -> i64 {
        self.offset
    }

    /// Returns the consumer group the commit is made on behalf of.
    pub fn consumer_group_id(&self) -> Option<&str> {
        self.consumer_group_id.as_deref()
    }

    /// Commits this offset through the consumer.
    ///
    /// Fails with [`ConsumerError::ConsumerShutdown`] once the consumer has
    /// been torn down, and with the underlying client error when the commit
    /// itself is rejected.
    pub async fn commit(&self) -> Result<(), ConsumerError> {
        let mut offsets = HashMap::with_capacity(1);
        offsets.insert(self.topic_partition.clone(), self.offset);
        self.commit.commit_offsets(offsets).await
    }
}

impl fmt::Debug for CommittableOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommittableOffset")
            .field("topic_partition", &self.topic_partition)
            .field("offset", &self.offset)
            .field("consumer_group_id", &self.consumer_group_id)
            .finish_non_exhaustive()
    }
}

impl PartialEq for CommittableOffset {
    fn eq(&self, other: &Self) -> bool {
        self.topic_partition == other.topic_partition
            && self.offset == other.offset
            && self.consumer_group_id == other.consumer_group_id
    }
}

impl fmt::Display for CommittableOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.topic_partition, self.offset)
    }
}

/// A consumed record paired with its committable offset.
#[derive(Debug, Clone)]
pub struct CommittableMessage<K, V> {
    pub record: Message<K, V>,
    pub committable_offset: CommittableOffset,
}

impl<K, V> CommittableMessage<K, V> {
    pub(crate) fn new(record: Message<K, V>, committable_offset: CommittableOffset) -> Self {
        Self {
            record,
            committable_offset,
        }
    }

    /// Returns the consumed record.
    pub fn record(&self) -> &Message<K, V> {
        &self.record
    }

    /// Returns the committable offset of the record.
    pub fn committable_offset(&self) -> &CommittableOffset {
        &self.committable_offset
    }

    /// Consumes the pair and returns the record.
    pub fn into_record(self) -> Message<K, V> {
        self.record
    }
}
