//! Stream orchestration on top of the consumer actor.
//!
//! Two lazy shapes are built over fetch requests:
//!
//! - the **unified stream**: one sequence of committable messages across
//!   all assigned partitions, assembled in rounds of expiring fetches so a
//!   silent partition cannot stall the others;
//! - the **partitioned stream**: an outer sequence yielding one inner
//!   [`PartitionStream`] per assigned partition, driven by non-expiring
//!   fetches, with rebalance callbacks feeding newly assigned partitions
//!   into the outer sequence.
//!
//! Backpressure comes from the bounded chunk queues between fetcher tasks
//! and the stream consumer; dropping a stream closes its queue, which the
//! fetchers observe and abort on.

use crate::rill::kafka::actor::{
    ExpiringFetchReason, FetchReason, OnRebalance, Request,
};
use crate::rill::kafka::chunk::Chunk;
use crate::rill::kafka::committable::CommittableMessage;
use crate::rill::kafka::kafka_error::ConsumerError;
use crate::rill::kafka::lifecycle::Lifecycle;
use crate::rill::kafka::topic_partition::TopicPartition;
use futures::task::{Context, Poll};
use futures::Stream;
use std::collections::{BTreeSet, VecDeque};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

type ChunkResult<K, V> = Result<Chunk<CommittableMessage<K, V>>, ConsumerError>;

// ---------------------------------------------------------------------
// Unified stream
// ---------------------------------------------------------------------

struct UnifiedState<K, V> {
    requests: mpsc::UnboundedSender<Request<K, V>>,
    lifecycle: Arc<Lifecycle>,
    poll_interval: Duration,
    buffer: VecDeque<CommittableMessage<K, V>>,
    round: Option<mpsc::Receiver<ChunkResult<K, V>>>,
    finished: bool,
}

impl<K, V> UnifiedState<K, V> {
    /// Ends the stream: a fatal lifecycle error becomes the terminal
    /// element, plain shutdown terminates cleanly.
    fn finish(&mut self) -> Option<Result<CommittableMessage<K, V>, ConsumerError>> {
        self.finished = true;
        match self.lifecycle.result() {
            Some(Err(e)) => Some(Err(e)),
            _ => None,
        }
    }
}

pub(crate) fn unified_stream<K, V>(
    requests: mpsc::UnboundedSender<Request<K, V>>,
    lifecycle: Arc<Lifecycle>,
    poll_interval: Duration,
) -> impl Stream<Item = Result<CommittableMessage<K, V>, ConsumerError>>
where
    K: Clone + Send + 'static,
    V: Clone + Send + 'static,
{
    let state = UnifiedState {
        requests,
        lifecycle,
        poll_interval,
        buffer: VecDeque::new(),
        round: None,
        finished: false,
    };
    futures::stream::unfold(state, |state| next_unified(state))
}

async fn next_unified<K, V>(
    mut state: UnifiedState<K, V>,
) -> Option<(
    Result<CommittableMessage<K, V>, ConsumerError>,
    UnifiedState<K, V>,
)>
where
    K: Clone + Send + 'static,
    V: Clone + Send + 'static,
{
    loop {
        if let Some(message) = state.buffer.pop_front() {
            return Some((Ok(message), state));
        }
        if state.finished {
            return None;
        }

        let lifecycle = state.lifecycle.clone();
        if let Some(mut round) = state.round.take() {
            tokio::select! {
                biased;
                chunk = round.recv() => match chunk {
                    Some(Ok(chunk)) => {
                        state.buffer.extend(chunk);
                        state.round = Some(round);
                    }
                    Some(Err(e)) => {
                        state.finished = true;
                        return Some((Err(e), state));
                    }
                    // All fetchers of the round are done; start the next one.
                    None => {}
                },
                _ = lifecycle.ended() => {
                    match state.finish() {
                        Some(terminal) => return Some((terminal, state)),
                        None => return None,
                    }
                }
            }
            continue;
        }

        // Start a round: ask for the current assignment first.
        let (reply_tx, reply_rx) = oneshot::channel();
        let request = Request::Assignment {
            on_rebalance: None,
            reply: reply_tx,
        };
        if state.requests.send(request).is_err() {
            match state.finish() {
                Some(terminal) => return Some((terminal, state)),
                None => return None,
            }
        }
        let assigned = tokio::select! {
            biased;
            res = reply_rx => match res {
                Ok(Ok(assigned)) => assigned,
                Ok(Err(e)) => {
                    state.finished = true;
                    return Some((Err(e), state));
                }
                Err(_) => match state.finish() {
                    Some(terminal) => return Some((terminal, state)),
                    None => return None,
                },
            },
            _ = lifecycle.ended() => {
                match state.finish() {
                    Some(terminal) => return Some((terminal, state)),
                    None => return None,
                }
            }
        };

        if assigned.is_empty() {
            // Nothing assigned yet; check again after a poll interval.
            tokio::select! {
                biased;
                _ = lifecycle.ended() => {
                    match state.finish() {
                        Some(terminal) => return Some((terminal, state)),
                        None => return None,
                    }
                }
                _ = tokio::time::sleep(state.poll_interval) => {}
            }
            continue;
        }

        let (chunk_tx, chunk_rx) = mpsc::channel(assigned.len());
        for tp in assigned {
            spawn_round_fetcher(
                tp,
                state.requests.clone(),
                chunk_tx.clone(),
                state.lifecycle.clone(),
            );
        }
        // The round ends when every fetcher has dropped its sender.
        drop(chunk_tx);
        state.round = Some(chunk_rx);
    }
}

/// One fetcher of a unified-stream round: issues a single expiring fetch
/// and forwards a non-empty chunk, racing against the consumer going away
/// or the round being abandoned.
fn spawn_round_fetcher<K, V>(
    tp: TopicPartition,
    requests: mpsc::UnboundedSender<Request<K, V>>,
    chunks: mpsc::Sender<ChunkResult<K, V>>,
    lifecycle: Arc<Lifecycle>,
) where
    K: Send + 'static,
    V: Send + 'static,
{
    tokio::spawn(async move {
        let (reply_tx, reply_rx) = oneshot::channel();
        let request = Request::ExpiringFetch {
            tp,
            reply: reply_tx,
        };
        if requests.send(request).is_err() {
            return;
        }
        tokio::select! {
            biased;
            res = reply_rx => match res {
                Ok(Ok((chunk, ExpiringFetchReason::Records))) if !chunk.is_empty() => {
                    let _ = chunks.send(Ok(chunk)).await;
                }
                // Expired, revoked or empty: the round slot resolved
                // without data for this partition.
                Ok(Ok(_)) => {}
                Ok(Err(e)) => {
                    let _ = chunks.send(Err(e)).await;
                }
                Err(_) => {}
            },
            _ = chunks.closed() => {}
            _ = lifecycle.ended() => {}
        }
    });
}

// ---------------------------------------------------------------------
// Partitioned stream
// ---------------------------------------------------------------------

/// Stream of the committable messages of one assigned partition.
///
/// Ends when the partition is revoked, when the consumer shuts down, or
/// when the outer partitioned stream is dropped. Record order within the
/// partition is preserved.
pub struct PartitionStream<K, V> {
    topic_partition: TopicPartition,
    chunks: mpsc::Receiver<ChunkResult<K, V>>,
    buffer: VecDeque<CommittableMessage<K, V>>,
    done: bool,
}

impl<K, V> PartitionStream<K, V>
where
    K: Clone + Send + 'static,
    V: Clone + Send + 'static,
{
    /// Spawns the fetch loop for `tp` and returns the stream over its
    /// chunk queue. The queue holds a single chunk: the fetch loop only
    /// requests more once the consumer has taken the previous batch.
    pub(crate) fn open(
        tp: TopicPartition,
        requests: mpsc::UnboundedSender<Request<K, V>>,
        lifecycle: Arc<Lifecycle>,
    ) -> Self {
        let (chunk_tx, chunk_rx) = mpsc::channel(1);
        let fetch_tp = tp.clone();
        tokio::spawn(async move {
            loop {
                let (reply_tx, reply_rx) = oneshot::channel();
                let request = Request::Fetch {
                    tp: fetch_tp.clone(),
                    reply: reply_tx,
                };
                if requests.send(request).is_err() {
                    return;
                }
                tokio::select! {
                    biased;
                    res = reply_rx => match res {
                        Ok(Ok((chunk, FetchReason::Records))) => {
                            if !chunk.is_empty() && chunk_tx.send(Ok(chunk)).await.is_err() {
                                return;
                            }
                        }
                        Ok(Ok((_, FetchReason::TopicPartitionRevoked))) => return,
                        Ok(Err(e)) => {
                            let _ = chunk_tx.send(Err(e)).await;
                            return;
                        }
                        Err(_) => return,
                    },
                    _ = chunk_tx.closed() => return,
                    _ = lifecycle.ended() => return,
                }
            }
        });
        Self {
            topic_partition: tp,
            chunks: chunk_rx,
            buffer: VecDeque::new(),
            done: false,
        }
    }

    /// Returns the partition this stream reads from.
    pub fn topic_partition(&self) -> &TopicPartition {
        &self.topic_partition
    }
}

impl<K, V> Stream for PartitionStream<K, V>
where
    K: Unpin,
    V: Unpin,
{
    type Item = Result<CommittableMessage<K, V>, ConsumerError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            if let Some(message) = this.buffer.pop_front() {
                return Poll::Ready(Some(Ok(message)));
            }
            if this.done {
                return Poll::Ready(None);
            }
            match this.chunks.poll_recv(cx) {
                Poll::Ready(Some(Ok(chunk))) => this.buffer.extend(chunk),
                Poll::Ready(Some(Err(e))) => {
                    this.done = true;
                    return Poll::Ready(Some(Err(e)));
                }
                Poll::Ready(None) => {
                    this.done = true;
                    return Poll::Ready(None);
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

struct PartitionedState<K, V> {
    requests: mpsc::UnboundedSender<Request<K, V>>,
    lifecycle: Arc<Lifecycle>,
    inner: Option<mpsc::UnboundedReceiver<(TopicPartition, PartitionStream<K, V>)>>,
    finished: bool,
}

type PartitionedItem<K, V> = Result<(TopicPartition, PartitionStream<K, V>), ConsumerError>;

impl<K, V> PartitionedState<K, V> {
    fn finish(&mut self) -> Option<PartitionedItem<K, V>> {
        self.finished = true;
        match self.lifecycle.result() {
            Some(Err(e)) => Some(Err(e)),
            _ => None,
        }
    }
}

pub(crate) fn partitioned_stream<K, V>(
    requests: mpsc::UnboundedSender<Request<K, V>>,
    lifecycle: Arc<Lifecycle>,
) -> impl Stream<Item = PartitionedItem<K, V>>
where
    K: Clone + Send + 'static,
    V: Clone + Send + 'static,
{
    let state = PartitionedState {
        requests,
        lifecycle,
        inner: None,
        finished: false,
    };
    futures::stream::unfold(state, |state| next_partition(state))
}

async fn next_partition<K, V>(
    mut state: PartitionedState<K, V>,
) -> Option<(PartitionedItem<K, V>, PartitionedState<K, V>)>
where
    K: Clone + Send + 'static,
    V: Clone + Send + 'static,
{
    loop {
        if state.finished {
            return None;
        }

        let lifecycle = state.lifecycle.clone();
        if let Some(mut inner) = state.inner.take() {
            tokio::select! {
                biased;
                item = inner.recv() => match item {
                    Some(pair) => {
                        state.inner = Some(inner);
                        return Some((Ok(pair), state));
                    }
                    None => match state.finish() {
                        Some(terminal) => return Some((terminal, state)),
                        None => return None,
                    },
                },
                _ = lifecycle.ended() => {
                    match state.finish() {
                        Some(terminal) => return Some((terminal, state)),
                        None => return None,
                    }
                }
            }
        }

        // First pull: register the rebalance listener and seed the outer
        // queue with the current assignment.
        let (outer_tx, outer_rx) = mpsc::unbounded_channel();
        let listener = {
            let outer_tx = outer_tx.clone();
            let requests = state.requests.clone();
            let lifecycle = state.lifecycle.clone();
            OnRebalance {
                on_assigned: Box::new(move |partitions: &BTreeSet<TopicPartition>| {
                    for tp in partitions {
                        let stream =
                            PartitionStream::open(tp.clone(), requests.clone(), lifecycle.clone());
                        let _ = outer_tx.send((tp.clone(), stream));
                    }
                }),
                // Revocation reaches each inner stream through its pending
                // fetch, after that fetch has resolved.
                on_revoked: Box::new(|_partitions: &BTreeSet<TopicPartition>| {}),
            }
        };

        let (reply_tx, reply_rx) = oneshot::channel();
        let request = Request::Assignment {
            on_rebalance: Some(listener),
            reply: reply_tx,
        };
        if state.requests.send(request).is_err() {
            match state.finish() {
                Some(terminal) => return Some((terminal, state)),
                None => return None,
            }
        }
        let assigned = tokio::select! {
            biased;
            res = reply_rx => match res {
                Ok(Ok(assigned)) => assigned,
                Ok(Err(e)) => {
                    state.finished = true;
                    return Some((Err(e), state));
                }
                Err(_) => match state.finish() {
                    Some(terminal) => return Some((terminal, state)),
                    None => return None,
                },
            },
            _ = lifecycle.ended() => {
                match state.finish() {
                    Some(terminal) => return Some((terminal, state)),
                    None => return None,
                }
            }
        };

        for tp in assigned {
            let stream =
                PartitionStream::open(tp.clone(), state.requests.clone(), state.lifecycle.clone());
            let _ = outer_tx.send((tp, stream));
        }
        drop(outer_tx);
        state.inner = Some(outer_rx);
    }
}
