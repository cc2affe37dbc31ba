//! The user-facing consumer.
//!
//! `KafkaConsumer` is a thin facade over the consumer actor: every
//! operation allocates a oneshot reply slot, posts a request record onto
//! the actor's queue and races the reply against the consumer lifecycle.
//! The heavy lifting (client access, fetch bookkeeping, rebalance
//! handling) happens in the actor; see the `actor` module.

use crate::rill::kafka::actor::{ConsumerActor, ReplyTo, Request};
use crate::rill::kafka::client::ClientFactory;
use crate::rill::kafka::client_handle::ClientHandle;
use crate::rill::kafka::committable::{CommitHandle, CommittableMessage};
use crate::rill::kafka::consumer_config::ConsumerConfig;
use crate::rill::kafka::kafka_error::ConsumerError;
use crate::rill::kafka::lifecycle::{supervise, ConsumerFiber, Lifecycle};
use crate::rill::kafka::poll_scheduler::run_poll_scheduler;
use crate::rill::kafka::serialization::Deserializer;
use crate::rill::kafka::streams::{partitioned_stream, unified_stream, PartitionStream};
use crate::rill::kafka::topic_partition::TopicPartition;
use futures::Stream;
use log::info;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

/// A concurrency-safe, backpressured Kafka consumer yielding committable
/// records.
///
/// The consumer multiplexes all operations onto a single underlying client
/// running on a dedicated thread; callers may therefore share it freely
/// across tasks. Records are exposed through two stream shapes: a unified
/// stream of all assigned partitions ([`stream`]) and a stream of
/// per-partition streams ([`partitioned_stream`]).
///
/// Dropping the consumer requests shutdown; [`fiber`] hands out a
/// lifecycle handle for explicit cancellation and joining.
///
/// # Examples
///
/// ```rust,ignore
/// use futures::StreamExt;
/// use rillstream::{
///     ConsumerConfig, KafkaConsumer, RdKafkaClientFactory, StringDeserializer,
/// };
///
/// let config = ConsumerConfig::new("localhost:9092", "my-group");
/// let consumer = KafkaConsumer::<String, String>::new(
///     config,
///     RdKafkaClientFactory,
///     StringDeserializer,
///     StringDeserializer,
/// )
/// .await?;
///
/// consumer.subscribe(["orders"]).await?;
///
/// let stream = consumer.stream();
/// futures::pin_mut!(stream);
/// while let Some(message) = stream.next().await {
///     let message = message?;
///     println!("{} = {:?}", message.record.offset(), message.record.value());
///     message.committable_offset.commit().await?;
/// }
/// ```
///
/// [`stream`]: KafkaConsumer::stream
/// [`partitioned_stream`]: KafkaConsumer::partitioned_stream
/// [`fiber`]: KafkaConsumer::fiber
pub struct KafkaConsumer<K, V> {
    requests: mpsc::UnboundedSender<Request<K, V>>,
    lifecycle: Arc<Lifecycle>,
    config: ConsumerConfig,
}

impl<K, V> KafkaConsumer<K, V>
where
    K: Clone + Send + 'static,
    V: Clone + Send + 'static,
{
    /// Creates the consumer: constructs the underlying client on its
    /// dedicated thread via `factory` and starts the actor, poll scheduler
    /// and supervisor tasks.
    ///
    /// # Errors
    ///
    /// Returns the factory's error when the underlying client cannot be
    /// constructed.
    pub async fn new<F, KD, VD>(
        config: ConsumerConfig,
        factory: F,
        key_deserializer: KD,
        value_deserializer: VD,
    ) -> Result<Self, ConsumerError>
    where
        F: ClientFactory,
        KD: Deserializer<K> + Send + Sync + 'static,
        VD: Deserializer<V> + Send + Sync + 'static,
    {
        let (client, ready) = ClientHandle::spawn(factory, config.clone());
        match ready.await {
            Ok(Ok(())) => {}
            Ok(Err(client_error)) => return Err(ConsumerError::Client(client_error)),
            Err(_) => {
                return Err(ConsumerError::Fatal(
                    "kafka client thread terminated during startup".to_string(),
                ))
            }
        }

        let (requests_tx, requests_rx) = mpsc::unbounded_channel();
        let (polls_tx, polls_rx) = mpsc::channel(1);
        let lifecycle = Lifecycle::new();

        let commit_handle = {
            let requests = requests_tx.clone();
            CommitHandle::new(Arc::new(move |offsets, reply| {
                requests
                    .send(Request::Commit { offsets, reply })
                    .map_err(|_| ConsumerError::ConsumerShutdown)
            }))
        };

        let actor = ConsumerActor::new(
            client,
            requests_rx,
            requests_tx.clone(),
            polls_rx,
            lifecycle.shutdown_signal(),
            config.clone(),
            Arc::new(key_deserializer),
            Arc::new(value_deserializer),
            commit_handle,
        );
        let actor_handle = tokio::spawn(actor.run());
        let scheduler_handle = tokio::spawn(run_poll_scheduler(
            polls_tx,
            config.poll_interval,
            lifecycle.shutdown_signal(),
        ));
        supervise(lifecycle.clone(), actor_handle, scheduler_handle);

        info!("kafka consumer created for group '{}'", config.group_id);
        Ok(Self {
            requests: requests_tx,
            lifecycle,
            config,
        })
    }

    /// Subscribes to a single topic. Convenience for [`subscribe`] with a
    /// one-element collection.
    ///
    /// [`subscribe`]: KafkaConsumer::subscribe
    pub async fn subscribe_to(&self, topic: impl Into<String>) -> Result<(), ConsumerError> {
        self.subscribe([topic.into()]).await
    }

    /// Subscribes to the given topics, replacing any previous
    /// subscription. The collection must be non-empty.
    pub async fn subscribe<I, S>(&self, topics: I) -> Result<(), ConsumerError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let topics: Vec<String> = topics.into_iter().map(Into::into).collect();
        if topics.is_empty() {
            return Err(ConsumerError::InvalidConfig(
                "subscribe requires at least one topic".to_string(),
            ));
        }
        self.roundtrip(|reply| Request::SubscribeTopics { topics, reply })
            .await
    }

    /// Subscribes to every topic matching the given pattern.
    pub async fn subscribe_pattern(
        &self,
        pattern: impl Into<String>,
    ) -> Result<(), ConsumerError> {
        let pattern = pattern.into();
        self.roundtrip(|reply| Request::SubscribePattern { pattern, reply })
            .await
    }

    /// Drops the current subscription.
    pub async fn unsubscribe(&self) -> Result<(), ConsumerError> {
        self.roundtrip(|reply| Request::Unsubscribe { reply }).await
    }

    /// Moves the fetch position of `tp` to `offset`. The next polls read
    /// from the new position.
    pub async fn seek(&self, tp: TopicPartition, offset: i64) -> Result<(), ConsumerError> {
        self.roundtrip(|reply| Request::Seek { tp, offset, reply })
            .await
    }

    /// Returns the partitions currently assigned to this consumer.
    pub async fn assignment(&self) -> Result<BTreeSet<TopicPartition>, ConsumerError> {
        self.roundtrip(|reply| Request::Assignment {
            on_rebalance: None,
            reply,
        })
        .await
    }

    /// Returns the first available offset of each given partition, using
    /// the configured default API timeout.
    pub async fn beginning_offsets(
        &self,
        partitions: BTreeSet<TopicPartition>,
    ) -> Result<HashMap<TopicPartition, i64>, ConsumerError> {
        self.beginning_offsets_with_timeout(partitions, self.config.default_api_timeout)
            .await
    }

    /// Returns the first available offset of each given partition.
    pub async fn beginning_offsets_with_timeout(
        &self,
        partitions: BTreeSet<TopicPartition>,
        timeout: Duration,
    ) -> Result<HashMap<TopicPartition, i64>, ConsumerError> {
        self.roundtrip(|reply| Request::BeginningOffsets {
            partitions,
            timeout,
            reply,
        })
        .await
    }

    /// Returns the offset one past the last record of each given
    /// partition, using the configured request timeout.
    pub async fn end_offsets(
        &self,
        partitions: BTreeSet<TopicPartition>,
    ) -> Result<HashMap<TopicPartition, i64>, ConsumerError> {
        self.end_offsets_with_timeout(partitions, self.config.request_timeout)
            .await
    }

    /// Returns the offset one past the last record of each given
    /// partition.
    pub async fn end_offsets_with_timeout(
        &self,
        partitions: BTreeSet<TopicPartition>,
        timeout: Duration,
    ) -> Result<HashMap<TopicPartition, i64>, ConsumerError> {
        self.roundtrip(|reply| Request::EndOffsets {
            partitions,
            timeout,
            reply,
        })
        .await
    }

    /// Returns the unified stream: committable messages of all assigned
    /// partitions, with per-partition order preserved.
    ///
    /// The stream is lazy and runs in rounds: each round fetches from
    /// every assigned partition in parallel, bounded by the configured
    /// fetch timeout, so one silent partition cannot stall the rest. The
    /// stream ends only on shutdown; it fails with
    /// [`ConsumerError::NotSubscribed`] when pulled before a subscription
    /// exists.
    pub fn stream(
        &self,
    ) -> impl Stream<Item = Result<CommittableMessage<K, V>, ConsumerError>> + '_ {
        unified_stream(
            self.requests.clone(),
            self.lifecycle.clone(),
            self.config.poll_interval,
        )
    }

    /// Returns the partitioned stream: one inner [`PartitionStream`] per
    /// assigned partition, including partitions assigned later through
    /// rebalances. Inner streams end when their partition is revoked; the
    /// outer stream ends on shutdown.
    pub fn partitioned_stream(
        &self,
    ) -> impl Stream<Item = Result<(TopicPartition, PartitionStream<K, V>), ConsumerError>> + '_
    {
        partitioned_stream(self.requests.clone(), self.lifecycle.clone())
    }

    /// Returns the lifecycle handle of this consumer.
    pub fn fiber(&self) -> ConsumerFiber {
        ConsumerFiber::new(self.lifecycle.clone())
    }

    /// Returns the consumer group ID.
    pub fn group_id(&self) -> &str {
        &self.config.group_id
    }

    /// Posts a request and awaits its reply slot, racing the reply against
    /// consumer termination.
    async fn roundtrip<T>(
        &self,
        build: impl FnOnce(ReplyTo<T>) -> Request<K, V>,
    ) -> Result<T, ConsumerError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.requests.send(build(reply_tx)).is_err() {
            return Err(ConsumerError::ConsumerShutdown);
        }
        tokio::select! {
            biased;
            res = reply_rx => match res {
                Ok(result) => result,
                Err(_) => Err(ConsumerError::ConsumerShutdown),
            },
            _ = self.lifecycle.ended() => Err(ConsumerError::ConsumerShutdown),
        }
    }
}

impl<K, V> Drop for KafkaConsumer<K, V> {
    fn drop(&mut self) {
        self.lifecycle.request_shutdown();
    }
}
