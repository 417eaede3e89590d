//! The three loops behind one process actor
//!
//! Puller reads upstream notifications onto the event queue, Processor
//! applies them through the policy, Pusher fans prompts out to downstream
//! actors. The loops share the pending-prompt set and the reader lock of
//! the process application, and every queue item carries the reset epoch
//! it was pulled under so a reset invalidates work already in flight.

use std::{
    collections::HashSet,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering}
    },
    time::Duration
};

use ractor::{ActorRef, rpc::CallResult};
use tokio::sync::{Mutex, Notify, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{Level, event};

use crate::{
    actor::message::ProcessMessage,
    domain::{
        constant::{processor, puller, pusher},
        error::RunnerError,
        notification::EventQueueItem,
        prompt::Prompt,
        retry::RetryPolicy
    },
    process::application::ProcessApplication
};

/// One unit of work on the event queue, tagged with the reset epoch it was
/// pulled under
///
/// A failed pull travels the queue as an error so the processor, which owns
/// recovery, performs the reset.
pub struct QueuedEvent {
    pub epoch:   u64,
    pub outcome: Result<EventQueueItem, RunnerError>
}

/// Reads upstream notification logs and feeds admitted events to the
/// processor
///
/// Wakes on a prompt or, as the lossy-prompt fallback, on every poll
/// interval. A round holds the reader lock of the application, so it never
/// interleaves with a reset.
pub struct Puller {
    pub application:   Arc<ProcessApplication>,
    pub pending:       Arc<Mutex<HashSet<String>>>,
    pub prompted:      Arc<Notify>,
    pub event_tx:      mpsc::Sender<QueuedEvent>,
    pub poll_interval: Duration,
    pub reset_epoch:   Arc<AtomicU64>,
    pub stop:          CancellationToken
}

impl Puller {
    pub async fn run(self) {
        loop {
            let was_prompted = tokio::select! {
                _ = self.stop.cancelled() => break,
                _ = self.prompted.notified() => true,
                _ = tokio::time::sleep(self.poll_interval) => false
            };

            let upstream_names = if was_prompted {
                let mut pending = self.pending.lock().await;
                std::mem::take(&mut *pending).into_iter().collect()
            } else {
                self.application.upstream_names().await
            };

            if upstream_names.is_empty() {
                continue;
            }

            if !self.pull_round(&upstream_names).await {
                break;
            }
        }

        event!(Level::DEBUG, event = puller::PULLER_STOPPED, process = %self.application.identity());
    }

    /// Pull every named upstream to exhaustion, returning false when the
    /// loop should stop
    async fn pull_round(&self, upstream_names: &[String]) -> bool {
        let mut readers = self.application.lock_readers().await;
        // Sampled under the lock: a reset that finished earlier is visible
        // here, and one that starts later waits for the lock and rewinds
        // whatever the round advanced
        let epoch = self.reset_epoch.load(Ordering::Acquire);

        for upstream_name in upstream_names {
            // Prompts can name an upstream this process does not follow
            let Some(reader) = readers.get_mut(upstream_name) else {
                continue;
            };

            loop {
                let page = match reader.next_page().await {
                    Ok(page) => page,
                    Err(e) => {
                        event!(Level::DEBUG, event = puller::PULL_FAILED,
                               process = %self.application.identity(), upstream = %upstream_name, error = %e);
                        return self.send(QueuedEvent { epoch, outcome: Err(e) }).await;
                    }
                };

                let page_len = page.len();
                if page_len > 0 {
                    event!(Level::DEBUG, event = puller::NOTIFICATIONS_PULLED,
                           process = %self.application.identity(), upstream = %upstream_name, count = page_len);
                }

                for notification in &page {
                    // A reset is waiting on this round's lock; whatever the
                    // round already sent carries the old epoch
                    if self.reset_epoch.load(Ordering::Acquire) != epoch {
                        event!(Level::DEBUG, event = puller::ROUND_ABANDONED,
                               process = %self.application.identity(), upstream = %upstream_name);
                        return true;
                    }

                    let admitted = match self
                        .application
                        .check_causal_dependencies(&notification.causal_dependencies)
                        .await
                    {
                        Ok(()) => self.application.event_from_notification(notification).map(|decoded| {
                            EventQueueItem {
                                event:           decoded,
                                notification_id: notification.id,
                                upstream_name:   upstream_name.clone()
                            }
                        }),
                        Err(e) => Err(e)
                    };

                    match admitted {
                        Ok(item) => {
                            if !self.send(QueuedEvent { epoch, outcome: Ok(item) }).await {
                                return false;
                            }
                        }
                        Err(e) => {
                            event!(Level::DEBUG, event = puller::PULL_FAILED,
                                   process = %self.application.identity(), upstream = %upstream_name,
                                   notification_id = notification.id, error = %e);
                            return self.send(QueuedEvent { epoch, outcome: Err(e) }).await;
                        }
                    }
                }

                if page_len < reader.page_size() {
                    break;
                }
            }
        }

        true
    }

    /// Enqueue one item, returning false when cancelled or the processor
    /// side is gone
    async fn send(&self, queued: QueuedEvent) -> bool {
        tokio::select! {
            _ = self.stop.cancelled() => false,
            sent = self.event_tx.send(queued) => sent.is_ok()
        }
    }
}

/// Applies queued upstream events through the policy and owns recovery
///
/// Any failure resets the world: bump the epoch, drain the queue, rewind
/// every reader to its durable tracking position, then mark all upstreams
/// prompted so the puller re-pulls from truth.
pub struct Processor {
    pub application: Arc<ProcessApplication>,
    pub event_rx:    mpsc::Receiver<QueuedEvent>,
    pub prompt_tx:   mpsc::Sender<Prompt>,
    pub pending:     Arc<Mutex<HashSet<String>>>,
    pub prompted:    Arc<Notify>,
    pub reset_epoch: Arc<AtomicU64>,
    pub retry:       RetryPolicy,
    pub pace:        Duration,
    pub stop:        CancellationToken
}

impl Processor {
    pub async fn run(mut self) {
        loop {
            let queued = tokio::select! {
                _ = self.stop.cancelled() => break,
                queued = self.event_rx.recv() => match queued {
                    Some(queued) => queued,
                    None => break
                }
            };

            if queued.epoch != self.reset_epoch.load(Ordering::Acquire) {
                event!(Level::DEBUG, event = processor::STALE_EVENT_SKIPPED, process = %self.application.identity());
                continue;
            }

            match queued.outcome {
                Ok(item) => {
                    if let Err(e) = self.apply(&item).await {
                        event!(Level::WARN, event = processor::EVENT_APPLY_FAILED,
                               process = %self.application.identity(), upstream = %item.upstream_name,
                               notification_id = item.notification_id, error = %e);
                        self.reset(&e).await;
                    }
                }
                Err(e) => self.reset(&e).await
            }
        }

        event!(Level::DEBUG, event = processor::PROCESSOR_STOPPED, process = %self.application.identity());
    }

    async fn apply(&self, item: &EventQueueItem) -> Result<(), RunnerError> {
        let new_events = self
            .retry
            .run(|| self.application.apply_upstream_event(&item.event, item.notification_id, &item.upstream_name))
            .await?;

        event!(Level::DEBUG, event = processor::EVENT_APPLIED,
               process = %self.application.identity(), upstream = %item.upstream_name,
               notification_id = item.notification_id, new_events = new_events.len());

        if !new_events.is_empty() {
            let prompt = Prompt::new(self.application.name(), self.application.pipeline_id());
            tokio::select! {
                _ = self.stop.cancelled() => {}
                _ = self.prompt_tx.send(prompt) => {}
            }
        }

        Ok(())
    }

    /// Reset the world after a failure
    ///
    /// Epoch first, so everything pulled before this instant is stale. The
    /// first drain runs without the reader lock, giving a puller blocked on
    /// a full queue room to finish its round and release the readers; the
    /// second drain runs under the lock and clears any straggler. The seek
    /// is retried for as long as it fails, because pulling from un-rewound
    /// readers after a drain would skip events.
    async fn reset(&mut self, cause: &RunnerError) {
        event!(Level::WARN, event = processor::RESET_STARTED,
               process = %self.application.identity(), error = %cause);

        self.reset_epoch.fetch_add(1, Ordering::AcqRel);
        while self.event_rx.try_recv().is_ok() {}

        let mut readers = self.application.lock_readers().await;
        while self.event_rx.try_recv().is_ok() {}

        let mut attempts: u32 = 0;
        loop {
            match self.application.seek_readers(&mut readers).await {
                Ok(()) => break,
                Err(e) => {
                    attempts += 1;
                    if attempts % self.retry.max_attempts() == 0 {
                        event!(Level::WARN, event = processor::RESET_FAILED,
                               process = %self.application.identity(), attempts = attempts, error = %e);
                    }
                    tokio::select! {
                        _ = self.stop.cancelled() => return,
                        _ = tokio::time::sleep(self.retry.backoff()) => {}
                    }
                }
            }
        }

        let upstream_names: Vec<String> = readers.keys().cloned().collect();
        drop(readers);

        self.pending.lock().await.extend(upstream_names);
        self.prompted.notify_one();

        event!(Level::DEBUG, event = processor::RESET_COMPLETED, process = %self.application.identity());

        // Keep a persistent failure from turning into a hot reset loop
        tokio::select! {
            _ = self.stop.cancelled() => {}
            _ = tokio::time::sleep(self.pace) => {}
        }
    }
}

/// Fans locally raised prompts out to every downstream process actor
///
/// Delivery is best effort; a missed prompt costs latency, never
/// correctness, because downstream pollers re-pull on their interval.
pub struct Pusher {
    pub process_name:     String,
    pub prompt_rx:        mpsc::Receiver<Prompt>,
    pub downstreams:      Vec<(String, ActorRef<ProcessMessage>)>,
    pub delivery_timeout: Duration,
    pub stop:             CancellationToken
}

impl Pusher {
    pub async fn run(mut self) {
        loop {
            let prompt = tokio::select! {
                _ = self.stop.cancelled() => break,
                prompt = self.prompt_rx.recv() => match prompt {
                    Some(prompt) => prompt,
                    None => break
                }
            };

            if self.downstreams.is_empty() {
                continue;
            }

            let targets: Vec<ActorRef<ProcessMessage>> =
                self.downstreams.iter().map(|(_, target)| target.clone()).collect();
            let delivered = ractor::rpc::multi_call(
                &targets,
                |reply| ProcessMessage::Prompt { prompt: prompt.clone(), reply },
                Some(self.delivery_timeout)
            )
            .await;

            match delivered {
                Ok(results) => {
                    for ((downstream_name, _), result) in self.downstreams.iter().zip(results) {
                        if !matches!(result, CallResult::Success(())) {
                            event!(Level::WARN, event = pusher::PROMPT_DELIVERY_FAILED,
                                   process = %self.process_name, downstream = %downstream_name);
                        }
                    }
                    event!(Level::DEBUG, event = pusher::PROMPT_PUSHED,
                           process = %self.process_name, downstreams = self.downstreams.len());
                }
                Err(e) => {
                    event!(Level::WARN, event = pusher::PROMPT_DELIVERY_FAILED,
                           process = %self.process_name, error = %e);
                }
            }
        }

        event!(Level::DEBUG, event = pusher::PUSHER_STOPPED, process = %self.process_name);
    }
}
