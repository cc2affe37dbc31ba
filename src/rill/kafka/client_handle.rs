//! Serialized access to the underlying client on a dedicated thread.
//!
//! librdkafka-style clients are not safe for concurrent use and expect a
//! consistent thread of access. The handle therefore spawns one OS thread
//! that constructs and owns the client; callers submit closures over a FIFO
//! job channel and await the result on a oneshot. Single-thread execution
//! plus FIFO ordering give exclusive, fair access without a separate lock.

use crate::rill::kafka::client::{ClientFactory, ConsumerClient};
use crate::rill::kafka::consumer_config::ConsumerConfig;
use crate::rill::kafka::kafka_error::{ClientError, ConsumerError};
use log::{debug, warn};
use std::sync::mpsc as std_mpsc;
use std::time::Duration;
use tokio::sync::oneshot;

type Job<C> = Box<dyn FnOnce(&mut C) + Send + 'static>;

/// Handle to the client thread. Dropping the handle disconnects the job
/// channel, which ends the thread after the jobs already queued have run.
pub(crate) struct ClientHandle<C> {
    jobs: std_mpsc::Sender<Job<C>>,
}

impl<C: ConsumerClient> ClientHandle<C> {
    /// Spawns the client thread and constructs the client on it.
    ///
    /// The returned receiver resolves once the factory has run: `Ok(())`
    /// when the client is ready, the factory error otherwise. If the thread
    /// could not start at all the receiver resolves with a receive error.
    pub(crate) fn spawn<F>(
        factory: F,
        config: ConsumerConfig,
    ) -> (Self, oneshot::Receiver<Result<(), ClientError>>)
    where
        F: ClientFactory<Client = C>,
    {
        let (jobs_tx, jobs_rx) = std_mpsc::channel::<Job<C>>();
        let (ready_tx, ready_rx) = oneshot::channel();
        let thread_name = format!("kafka-client-{}", config.group_id);

        let spawned = std::thread::Builder::new()
            .name(thread_name)
            .spawn(move || {
                let mut client = match factory.create(&config) {
                    Ok(client) => {
                        let _ = ready_tx.send(Ok(()));
                        client
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                while let Ok(job) = jobs_rx.recv() {
                    job(&mut client);
                }
                debug!("kafka client thread for group '{}' exiting", config.group_id);
            });

        if let Err(e) = spawned {
            warn!("failed to spawn kafka client thread: {}", e);
        }

        (Self { jobs: jobs_tx }, ready_rx)
    }

    /// Runs `action` on the client thread with exclusive access to the
    /// client, returning its result.
    ///
    /// Fails with a fatal error when the client thread is no longer
    /// running.
    pub(crate) async fn with_client<F, R>(&self, action: F) -> Result<R, ConsumerError>
    where
        F: FnOnce(&mut C) -> R + Send + 'static,
        R: Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        let job: Job<C> = Box::new(move |client| {
            let _ = reply_tx.send(action(client));
        });
        self.jobs
            .send(job)
            .map_err(|_| ConsumerError::Fatal("kafka client thread terminated".to_string()))?;
        reply_rx
            .await
            .map_err(|_| ConsumerError::Fatal("kafka client thread terminated".to_string()))
    }

    /// Closes the client on its thread. Failures are logged, not
    /// propagated: close runs on the shutdown path where no caller is left
    /// to observe them.
    pub(crate) async fn close(&self, timeout: Duration) {
        match self.with_client(move |client| client.close(timeout)).await {
            Ok(Ok(())) => debug!("kafka client closed"),
            Ok(Err(e)) => warn!("kafka client close failed: {}", e),
            Err(_) => {}
        }
    }
}
