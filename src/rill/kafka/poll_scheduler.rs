//! Periodic poll scheduling.
//!
//! The scheduler enqueues a tick into a capacity-1 queue and then sleeps
//! for the poll interval. When the actor has not yet drained the previous
//! tick, the send blocks, which collapses bursts and throttles polling to
//! the actor's pace. This is the main backpressure path when stream
//! consumers stop reading.

use crate::rill::kafka::kafka_error::ConsumerError;
use log::debug;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

/// Marker carried on the poll queue. One tick triggers one client poll.
pub(crate) struct PollTick;

pub(crate) async fn run_poll_scheduler(
    polls: mpsc::Sender<PollTick>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), ConsumerError> {
    loop {
        tokio::select! {
            biased;
            _ = shutdown.wait_for(|stop| *stop) => {
                debug!("poll scheduler stopping");
                return Ok(());
            }
            sent = polls.send(PollTick) => {
                if sent.is_err() {
                    debug!("poll queue closed, poll scheduler stopping");
                    return Ok(());
                }
            }
        }
        tokio::select! {
            biased;
            _ = shutdown.wait_for(|stop| *stop) => {
                debug!("poll scheduler stopping");
                return Ok(());
            }
            _ = tokio::time::sleep(interval) => {}
        }
    }
}
