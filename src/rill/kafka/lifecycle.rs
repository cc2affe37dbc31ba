//! Consumer lifecycle: linked shutdown of the actor and poll scheduler.
//!
//! A consumer instance runs three background tasks: the actor, the poll
//! scheduler and a supervisor that owns the other two. The supervisor
//! waits for either task to exit, requests shutdown of the remaining one,
//! and publishes the combined outcome. Facade calls and streams race
//! against that outcome to observe termination.

use crate::rill::kafka::kafka_error::ConsumerError;
use log::{debug, error};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};

#[derive(Clone)]
enum LifecycleState {
    Running,
    Done(Result<(), ConsumerError>),
}

/// Shared lifecycle cell: a shutdown request flag and a completion slot.
pub(crate) struct Lifecycle {
    shutdown_tx: watch::Sender<bool>,
    done_tx: watch::Sender<LifecycleState>,
}

impl Lifecycle {
    pub(crate) fn new() -> Arc<Self> {
        let (shutdown_tx, _) = watch::channel(false);
        let (done_tx, _) = watch::channel(LifecycleState::Running);
        Arc::new(Self {
            shutdown_tx,
            done_tx,
        })
    }

    /// Asks the consumer tasks to stop. Idempotent. The flag is stored
    /// even when no task is subscribed at this moment.
    pub(crate) fn request_shutdown(&self) {
        self.shutdown_tx.send_replace(true);
    }

    /// Returns a receiver that observes the shutdown request flag.
    pub(crate) fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// Resolves once the consumer has fully terminated.
    pub(crate) async fn ended(&self) {
        let mut done = self.done_tx.subscribe();
        let _ = done
            .wait_for(|state| matches!(state, LifecycleState::Done(_)))
            .await;
    }

    /// Returns the termination result, or `None` while still running.
    pub(crate) fn result(&self) -> Option<Result<(), ConsumerError>> {
        match &*self.done_tx.borrow() {
            LifecycleState::Done(result) => Some(result.clone()),
            LifecycleState::Running => None,
        }
    }

    fn complete(&self, result: Result<(), ConsumerError>) {
        self.done_tx.send_replace(LifecycleState::Done(result));
    }
}

/// Lifecycle handle of a consumer instance.
///
/// Obtained from `KafkaConsumer::fiber`. `join` waits for the consumer to
/// terminate on its own; `cancel` requests shutdown and waits for it to
/// finish. Cancellation is not an error: a cancelled consumer joins with
/// `Ok(())`.
#[derive(Clone)]
pub struct ConsumerFiber {
    lifecycle: Arc<Lifecycle>,
}

impl ConsumerFiber {
    pub(crate) fn new(lifecycle: Arc<Lifecycle>) -> Self {
        Self { lifecycle }
    }

    /// Waits until the consumer has terminated and returns its outcome.
    pub async fn join(&self) -> Result<(), ConsumerError> {
        self.lifecycle.ended().await;
        self.lifecycle.result().unwrap_or(Ok(()))
    }

    /// Requests shutdown and waits for teardown to complete.
    pub async fn cancel(&self) {
        self.lifecycle.request_shutdown();
        self.lifecycle.ended().await;
    }
}

enum FirstExit {
    Actor(Result<Result<(), ConsumerError>, JoinError>),
    Scheduler(Result<Result<(), ConsumerError>, JoinError>),
}

/// Spawns the supervisor linking the actor and scheduler tasks: when either
/// exits, the other is asked to stop, and the combined result is published
/// on the lifecycle.
pub(crate) fn supervise(
    lifecycle: Arc<Lifecycle>,
    actor: JoinHandle<Result<(), ConsumerError>>,
    scheduler: JoinHandle<Result<(), ConsumerError>>,
) {
    tokio::spawn(async move {
        let mut actor = actor;
        let mut scheduler = scheduler;

        let first = tokio::select! {
            res = &mut actor => FirstExit::Actor(res),
            res = &mut scheduler => FirstExit::Scheduler(res),
        };
        lifecycle.request_shutdown();

        let result = match first {
            FirstExit::Actor(res) => flatten_join(res).and(flatten_join(scheduler.await)),
            FirstExit::Scheduler(res) => flatten_join(res).and(flatten_join(actor.await)),
        };

        match &result {
            Ok(()) => debug!("consumer terminated"),
            Err(e) => error!("consumer terminated with error: {}", e),
        }
        lifecycle.complete(result);
    });
}

fn flatten_join(res: Result<Result<(), ConsumerError>, JoinError>) -> Result<(), ConsumerError> {
    match res {
        Ok(result) => result,
        Err(e) if e.is_cancelled() => Ok(()),
        Err(e) => Err(ConsumerError::Fatal(format!(
            "consumer task panicked: {}",
            e
        ))),
    }
}
