//! The consumer actor: a single task serializing all client access and
//! fetch bookkeeping.
//!
//! The actor consumes two queues. The unbounded `requests` queue carries
//! caller work (subscriptions, seeks, offset queries, fetches, commits)
//! and is always drained first; only when it is empty does the actor block
//! on the capacity-1 poll queue fed by the scheduler. After every handled
//! request the actor yields so a busy caller cannot starve the rest of the
//! runtime.
//!
//! All mutable consumer state lives in [`ActorState`] and is touched by
//! the actor task alone. Callers communicate exclusively through request
//! records carrying oneshot reply slots; each slot is resolved exactly
//! once, by poll delivery, expiration, revocation or shutdown.

use crate::rill::kafka::chunk::Chunk;
use crate::rill::kafka::client::{ClientRecord, ConsumerClient};
use crate::rill::kafka::client_handle::ClientHandle;
use crate::rill::kafka::committable::{CommitHandle, CommittableMessage, CommittableOffset};
use crate::rill::kafka::consumer_config::ConsumerConfig;
use crate::rill::kafka::kafka_error::{ClientError, ConsumerError};
use crate::rill::kafka::message::Message;
use crate::rill::kafka::poll_scheduler::PollTick;
use crate::rill::kafka::serialization::Deserializer;
use crate::rill::kafka::topic_partition::TopicPartition;
use log::{debug, error, info};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};

/// Why a fetch slot resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchReason {
    /// The poll delivered records for the partition.
    Records,
    /// The partition was revoked from this consumer.
    TopicPartitionRevoked,
}

/// Why an expiring fetch slot resolved. Extends [`FetchReason`] with the
/// expiration case used by the unified stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpiringFetchReason {
    /// The poll delivered records for the partition.
    Records,
    /// The partition was revoked from this consumer.
    TopicPartitionRevoked,
    /// The fetch timed out before any records arrived.
    FetchExpired,
}

impl From<FetchReason> for ExpiringFetchReason {
    fn from(reason: FetchReason) -> Self {
        match reason {
            FetchReason::Records => ExpiringFetchReason::Records,
            FetchReason::TopicPartitionRevoked => ExpiringFetchReason::TopicPartitionRevoked,
        }
    }
}

pub(crate) type ReplyTo<T> = oneshot::Sender<Result<T, ConsumerError>>;
pub(crate) type FetchReply<K, V> =
    oneshot::Sender<Result<(Chunk<CommittableMessage<K, V>>, FetchReason), ConsumerError>>;
pub(crate) type ExpiringFetchReply<K, V> =
    oneshot::Sender<Result<(Chunk<CommittableMessage<K, V>>, ExpiringFetchReason), ConsumerError>>;

/// Rebalance callbacks installed by an `Assignment` request. Both run
/// inside the poll handler, while no other request is being processed.
pub(crate) struct OnRebalance {
    pub(crate) on_assigned: Box<dyn FnMut(&BTreeSet<TopicPartition>) + Send>,
    pub(crate) on_revoked: Box<dyn FnMut(&BTreeSet<TopicPartition>) + Send>,
}

/// Requests accepted by the actor. Poll triggers arrive on their own
/// queue; `ExpireFetch` is posted by the one-shot expiration timers.
pub(crate) enum Request<K, V> {
    Fetch {
        tp: TopicPartition,
        reply: FetchReply<K, V>,
    },
    ExpiringFetch {
        tp: TopicPartition,
        reply: ExpiringFetchReply<K, V>,
    },
    ExpireFetch {
        tp: TopicPartition,
        token: u64,
    },
    Assignment {
        on_rebalance: Option<OnRebalance>,
        reply: ReplyTo<BTreeSet<TopicPartition>>,
    },
    SubscribeTopics {
        topics: Vec<String>,
        reply: ReplyTo<()>,
    },
    SubscribePattern {
        pattern: String,
        reply: ReplyTo<()>,
    },
    Unsubscribe {
        reply: ReplyTo<()>,
    },
    Seek {
        tp: TopicPartition,
        offset: i64,
        reply: ReplyTo<()>,
    },
    BeginningOffsets {
        partitions: BTreeSet<TopicPartition>,
        timeout: Duration,
        reply: ReplyTo<HashMap<TopicPartition, i64>>,
    },
    EndOffsets {
        partitions: BTreeSet<TopicPartition>,
        timeout: Duration,
        reply: ReplyTo<HashMap<TopicPartition, i64>>,
    },
    Commit {
        offsets: HashMap<TopicPartition, i64>,
        reply: ReplyTo<()>,
    },
}

enum FetchWaiter<K, V> {
    NonExpiring(FetchReply<K, V>),
    Expiring {
        reply: ExpiringFetchReply<K, V>,
        token: u64,
    },
}

/// State owned exclusively by the actor task.
///
/// Invariant: a partition has buffered records only while it has no
/// pending fetch waiters; a waiting fetch is completed the moment records
/// for its partition arrive.
struct ActorState<K, V> {
    fetches: HashMap<TopicPartition, Vec<FetchWaiter<K, V>>>,
    records: HashMap<TopicPartition, Chunk<CommittableMessage<K, V>>>,
    subscribed: bool,
    streaming: bool,
    rebalance_listeners: Vec<OnRebalance>,
    next_token: u64,
}

impl<K, V> ActorState<K, V> {
    fn new() -> Self {
        Self {
            fetches: HashMap::new(),
            records: HashMap::new(),
            subscribed: false,
            streaming: false,
            rebalance_listeners: Vec::new(),
            next_token: 0,
        }
    }
}

pub(crate) struct ConsumerActor<C, K, V>
where
    C: ConsumerClient,
{
    client: ClientHandle<C>,
    requests: mpsc::UnboundedReceiver<Request<K, V>>,
    requests_tx: mpsc::UnboundedSender<Request<K, V>>,
    polls: mpsc::Receiver<PollTick>,
    shutdown: watch::Receiver<bool>,
    config: ConsumerConfig,
    key_deserializer: Arc<dyn Deserializer<K> + Send + Sync>,
    value_deserializer: Arc<dyn Deserializer<V> + Send + Sync>,
    commit_handle: CommitHandle,
    group_id: Option<String>,
    state: ActorState<K, V>,
}

impl<C, K, V> ConsumerActor<C, K, V>
where
    C: ConsumerClient,
    K: Clone + Send + 'static,
    V: Clone + Send + 'static,
{
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        client: ClientHandle<C>,
        requests: mpsc::UnboundedReceiver<Request<K, V>>,
        requests_tx: mpsc::UnboundedSender<Request<K, V>>,
        polls: mpsc::Receiver<PollTick>,
        shutdown: watch::Receiver<bool>,
        config: ConsumerConfig,
        key_deserializer: Arc<dyn Deserializer<K> + Send + Sync>,
        value_deserializer: Arc<dyn Deserializer<V> + Send + Sync>,
        commit_handle: CommitHandle,
    ) -> Self {
        let group_id = if config.group_id.is_empty() {
            None
        } else {
            Some(config.group_id.clone())
        };
        Self {
            client,
            requests,
            requests_tx,
            polls,
            shutdown,
            config,
            key_deserializer,
            value_deserializer,
            commit_handle,
            group_id,
            state: ActorState::new(),
        }
    }

    pub(crate) async fn run(mut self) -> Result<(), ConsumerError> {
        debug!("consumer actor started");
        let result = self.run_loop().await;
        if let Err(e) = &result {
            error!("consumer actor failed: {}", e);
        }
        self.resolve_pending_on_shutdown();
        self.client.close(self.config.close_timeout).await;
        debug!("consumer actor stopped");
        result
    }

    async fn run_loop(&mut self) -> Result<(), ConsumerError> {
        loop {
            if *self.shutdown.borrow() {
                return Ok(());
            }
            // User requests take priority over scheduled polls.
            match self.requests.try_recv() {
                Ok(request) => {
                    self.handle_request(request).await?;
                    tokio::task::yield_now().await;
                    continue;
                }
                Err(mpsc::error::TryRecvError::Empty) => {}
                Err(mpsc::error::TryRecvError::Disconnected) => return Ok(()),
            }
            tokio::select! {
                biased;
                _ = self.shutdown.changed() => return Ok(()),
                request = self.requests.recv() => match request {
                    Some(request) => {
                        self.handle_request(request).await?;
                        tokio::task::yield_now().await;
                    }
                    None => return Ok(()),
                },
                tick = self.polls.recv() => match tick {
                    Some(PollTick) => self.handle_poll().await?,
                    None => return Ok(()),
                },
            }
        }
    }

    async fn handle_request(&mut self, request: Request<K, V>) -> Result<(), ConsumerError> {
        match request {
            Request::SubscribeTopics { topics, reply } => {
                let joined = topics.join(", ");
                let outcome = self.client.with_client(move |c| c.subscribe(&topics)).await;
                if deliver(reply, outcome)? {
                    self.state.subscribed = true;
                    info!("subscribed to topics [{}]", joined);
                }
                Ok(())
            }
            Request::SubscribePattern { pattern, reply } => {
                let shown = pattern.clone();
                let outcome = self
                    .client
                    .with_client(move |c| c.subscribe_pattern(&pattern))
                    .await;
                if deliver(reply, outcome)? {
                    self.state.subscribed = true;
                    info!("subscribed to pattern '{}'", shown);
                }
                Ok(())
            }
            Request::Unsubscribe { reply } => {
                let outcome = self.client.with_client(|c| c.unsubscribe()).await;
                if deliver(reply, outcome)? {
                    self.state.subscribed = false;
                    info!("unsubscribed");
                }
                Ok(())
            }
            Request::Seek { tp, offset, reply } => {
                let outcome = self
                    .client
                    .with_client(move |c| c.seek(&tp, offset))
                    .await;
                deliver(reply, outcome)?;
                Ok(())
            }
            Request::BeginningOffsets {
                partitions,
                timeout,
                reply,
            } => {
                let outcome = self
                    .client
                    .with_client(move |c| c.beginning_offsets(&partitions, timeout))
                    .await;
                deliver(reply, outcome)?;
                Ok(())
            }
            Request::EndOffsets {
                partitions,
                timeout,
                reply,
            } => {
                let outcome = self
                    .client
                    .with_client(move |c| c.end_offsets(&partitions, timeout))
                    .await;
                deliver(reply, outcome)?;
                Ok(())
            }
            Request::Commit { offsets, reply } => {
                let outcome = self
                    .client
                    .with_client(move |c| c.commit_sync(&offsets))
                    .await;
                deliver(reply, outcome)?;
                Ok(())
            }
            Request::Assignment {
                on_rebalance,
                reply,
            } => {
                if !self.state.subscribed {
                    let _ = reply.send(Err(ConsumerError::NotSubscribed));
                    return Ok(());
                }
                let outcome = self.client.with_client(|c| c.assignment()).await;
                if deliver(reply, outcome)? {
                    if let Some(listener) = on_rebalance {
                        self.state.rebalance_listeners.push(listener);
                    }
                }
                Ok(())
            }
            Request::Fetch { tp, reply } => {
                self.mark_streaming();
                if !self.state.subscribed {
                    let _ = reply.send(Err(ConsumerError::NotSubscribed));
                    return Ok(());
                }
                if let Some(buffered) = self.state.records.remove(&tp) {
                    let _ = reply.send(Ok((buffered, FetchReason::Records)));
                } else {
                    self.state
                        .fetches
                        .entry(tp)
                        .or_default()
                        .push(FetchWaiter::NonExpiring(reply));
                }
                Ok(())
            }
            Request::ExpiringFetch { tp, reply } => {
                self.mark_streaming();
                if !self.state.subscribed {
                    let _ = reply.send(Err(ConsumerError::NotSubscribed));
                    return Ok(());
                }
                if let Some(buffered) = self.state.records.remove(&tp) {
                    let _ = reply.send(Ok((buffered, ExpiringFetchReason::Records)));
                } else {
                    let token = self.state.next_token;
                    self.state.next_token += 1;
                    self.state
                        .fetches
                        .entry(tp.clone())
                        .or_default()
                        .push(FetchWaiter::Expiring { reply, token });
                    let requests = self.requests_tx.clone();
                    let delay = self.config.fetch_timeout;
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        let _ = requests.send(Request::ExpireFetch { tp, token });
                    });
                }
                Ok(())
            }
            Request::ExpireFetch { tp, token } => {
                // A stale token means the fetch already resolved; nothing to do.
                let mut emptied = false;
                if let Some(waiters) = self.state.fetches.get_mut(&tp) {
                    let position = waiters.iter().position(
                        |w| matches!(w, FetchWaiter::Expiring { token: t, .. } if *t == token),
                    );
                    if let Some(idx) = position {
                        if let FetchWaiter::Expiring { reply, .. } = waiters.remove(idx) {
                            let _ = reply
                                .send(Ok((Chunk::empty(), ExpiringFetchReason::FetchExpired)));
                        }
                        emptied = waiters.is_empty();
                    }
                }
                if emptied {
                    self.state.fetches.remove(&tp);
                }
                Ok(())
            }
        }
    }

    fn mark_streaming(&mut self) {
        if !self.state.streaming {
            self.state.streaming = true;
            debug!("first fetch received, consumer is streaming");
        }
    }

    /// One poll cycle: read the assignment snapshot, drain the client,
    /// re-read the assignment, then dispatch records and rebalance
    /// callbacks. Everything here runs before the actor takes its next
    /// request.
    async fn handle_poll(&mut self) -> Result<(), ConsumerError> {
        if !self.state.subscribed {
            return Ok(());
        }
        let poll_timeout = self.config.poll_timeout;
        let outcome = self
            .client
            .with_client(move |c| {
                let previous = c.assignment()?;
                let drained = c.poll(poll_timeout)?;
                let current = c.assignment()?;
                Ok::<_, ClientError>((previous, drained, current))
            })
            .await?;
        let (previous, drained, current) = outcome?;

        if !drained.is_empty() {
            debug!("poll drained {} records", drained.len());
        }

        let mut by_partition: BTreeMap<TopicPartition, Vec<CommittableMessage<K, V>>> =
            BTreeMap::new();
        for record in drained {
            let tp = record.topic_partition();
            let message = self.to_committable(record)?;
            by_partition.entry(tp).or_default().push(message);
        }

        for (tp, messages) in by_partition {
            let chunk = Chunk::from_vec(messages);
            match self.state.fetches.remove(&tp) {
                Some(waiters) if !waiters.is_empty() => {
                    // Every pending fetch for the partition sees the same chunk.
                    debug!(
                        "delivering {} records to {} fetcher(s) on {}",
                        chunk.len(),
                        waiters.len(),
                        tp
                    );
                    for waiter in waiters {
                        complete_with_records(waiter, chunk.clone());
                    }
                }
                _ => {
                    let merged = match self.state.records.remove(&tp) {
                        Some(existing) => existing.concat(chunk),
                        None => chunk,
                    };
                    self.state.records.insert(tp, merged);
                }
            }
        }

        let revoked: BTreeSet<TopicPartition> =
            previous.difference(&current).cloned().collect();
        if !revoked.is_empty() {
            info!(
                "partitions revoked: {:?}",
                revoked.iter().map(ToString::to_string).collect::<Vec<_>>()
            );
            for tp in &revoked {
                if let Some(waiters) = self.state.fetches.remove(tp) {
                    for waiter in waiters {
                        complete_revoked(waiter);
                    }
                }
                self.state.records.remove(tp);
            }
            for listener in &mut self.state.rebalance_listeners {
                (listener.on_revoked)(&revoked);
            }
        }

        let newly_assigned: BTreeSet<TopicPartition> =
            current.difference(&previous).cloned().collect();
        if !newly_assigned.is_empty() {
            info!(
                "partitions assigned: {:?}",
                newly_assigned
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
            );
            for listener in &mut self.state.rebalance_listeners {
                (listener.on_assigned)(&newly_assigned);
            }
        }

        Ok(())
    }

    fn to_committable(
        &self,
        record: ClientRecord,
    ) -> Result<CommittableMessage<K, V>, ConsumerError> {
        let key = match &record.key {
            Some(bytes) => Some(self.key_deserializer.deserialize(&record.topic, bytes)?),
            None => None,
        };
        let value = self
            .value_deserializer
            .deserialize(&record.topic, &record.value)?;
        let committable_offset = CommittableOffset::new(
            record.topic_partition(),
            record.offset + 1,
            self.group_id.clone(),
            self.commit_handle.clone(),
        );
        let message = Message::new(
            key,
            value,
            record.headers,
            record.topic,
            record.partition,
            record.offset,
            record.timestamp,
        );
        Ok(CommittableMessage::new(message, committable_offset))
    }

    fn resolve_pending_on_shutdown(&mut self) {
        for (_, waiters) in self.state.fetches.drain() {
            for waiter in waiters {
                complete_revoked(waiter);
            }
        }
        self.state.records.clear();
    }
}

fn complete_with_records<K, V>(waiter: FetchWaiter<K, V>, chunk: Chunk<CommittableMessage<K, V>>) {
    match waiter {
        FetchWaiter::NonExpiring(reply) => {
            let _ = reply.send(Ok((chunk, FetchReason::Records)));
        }
        FetchWaiter::Expiring { reply, .. } => {
            let _ = reply.send(Ok((chunk, ExpiringFetchReason::Records)));
        }
    }
}

fn complete_revoked<K, V>(waiter: FetchWaiter<K, V>) {
    match waiter {
        FetchWaiter::NonExpiring(reply) => {
            let _ = reply.send(Ok((Chunk::empty(), FetchReason::TopicPartitionRevoked)));
        }
        FetchWaiter::Expiring { reply, .. } => {
            let _ = reply.send(Ok((
                Chunk::empty(),
                ExpiringFetchReason::TopicPartitionRevoked,
            )));
        }
    }
}

/// Sends the outcome of a client call to the waiting caller. Returns
/// whether the call succeeded; a dead client thread is escalated so the
/// actor stops.
fn deliver<T>(
    reply: ReplyTo<T>,
    outcome: Result<Result<T, ClientError>, ConsumerError>,
) -> Result<bool, ConsumerError> {
    match outcome {
        Ok(Ok(value)) => {
            let _ = reply.send(Ok(value));
            Ok(true)
        }
        Ok(Err(client_error)) => {
            let _ = reply.send(Err(ConsumerError::Client(client_error)));
            Ok(false)
        }
        Err(fatal) => {
            let _ = reply.send(Err(fatal.clone()));
            Err(fatal)
        }
    }
}
