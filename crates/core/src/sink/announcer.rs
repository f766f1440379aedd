//! Fan-out multiplexer over the registered sinks.
//!
//! One bounded queue plus one worker task per sink: events for a single sink
//! stay in production order, a stalled or failing sink only ever loses its
//! own events, and no sink can block another.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, warn};

use super::Sink;
use crate::torrent::TorrentDescriptor;

const QUEUE_DEPTH: usize = 64;

enum SinkEvent {
    Torrent {
        is_new: bool,
        descriptor: Arc<TorrentDescriptor>,
    },
    Milestone(u64),
}

struct SinkWorker {
    queue: mpsc::Sender<SinkEvent>,
    handle: JoinHandle<()>,
}

pub struct Announcer {
    workers: Mutex<Vec<SinkWorker>>,
}

impl Announcer {
    pub fn new(sinks: Vec<Arc<dyn Sink>>) -> Self {
        let workers: Vec<SinkWorker> = sinks
            .into_iter()
            .enumerate()
            .map(|(index, sink)| {
                let (queue, mut events) = mpsc::channel(QUEUE_DEPTH);
                let handle = tokio::spawn(async move {
                    while let Some(event) = events.recv().await {
                        let result = match &event {
                            SinkEvent::Torrent { is_new, descriptor } => {
                                sink.send(*is_new, descriptor).await
                            }
                            SinkEvent::Milestone(offset) => sink.send_milestone(*offset).await,
                        };
                        if let Err(e) = result {
                            error!(sink = index, error = %e, "sink delivery failed");
                        }
                    }
                    sink.close().await;
                });
                SinkWorker { queue, handle }
            })
            .collect();
        Self {
            workers: Mutex::new(workers),
        }
    }

    pub fn sink_count(&self) -> usize {
        self.workers.lock().unwrap().len()
    }

    /// Dispatch a torrent event to every sink.
    ///
    /// Enqueueing never blocks: a sink whose queue is full loses this event
    /// (logged) instead of stalling the crawl loop or its peers.
    pub fn send(&self, is_new: bool, descriptor: TorrentDescriptor) {
        let descriptor = Arc::new(descriptor);
        for worker in self.workers.lock().unwrap().iter() {
            enqueue(
                worker,
                SinkEvent::Torrent {
                    is_new,
                    descriptor: Arc::clone(&descriptor),
                },
            );
        }
    }

    /// Dispatch an anniversary event to every sink.
    pub fn send_milestone(&self, offset: u64) {
        for worker in self.workers.lock().unwrap().iter() {
            enqueue(worker, SinkEvent::Milestone(offset));
        }
    }

    /// Drain the queues and wait for the workers with a bounded grace.
    /// Events sent afterwards are dropped and logged.
    pub async fn close(&self, grace: Duration) {
        let workers = std::mem::take(&mut *self.workers.lock().unwrap());
        let handles: Vec<JoinHandle<()>> = workers
            .into_iter()
            .map(|worker| {
                drop(worker.queue);
                worker.handle
            })
            .collect();
        for handle in handles {
            if tokio::time::timeout(grace, handle).await.is_err() {
                warn!("sink worker did not drain within the close grace");
            }
        }
    }
}

fn enqueue(worker: &SinkWorker, event: SinkEvent) {
    if let Err(e) = worker.queue.try_send(event) {
        warn!(error = %e, "sink queue rejected event");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockSink, SinkRecord};

    fn descriptor(name: &str) -> TorrentDescriptor {
        let mut d = TorrentDescriptor::new(name.to_string());
        d.length = 1;
        d.files.insert(format!("/{name}"), true);
        d
    }

    #[tokio::test]
    async fn test_per_sink_ordering() {
        let sink = Arc::new(MockSink::new());
        let sinks: Vec<Arc<dyn Sink>> = vec![sink.clone()];
        let announcer = Announcer::new(sinks);

        announcer.send(true, descriptor("a"));
        announcer.send(false, descriptor("b"));
        announcer.send_milestone(10);
        announcer.close(Duration::from_secs(1)).await;

        let events = sink.events();
        assert_eq!(events.len(), 3);
        assert!(matches!(&events[0], SinkRecord::Torrent { name, is_new: true } if name == "a"));
        assert!(matches!(&events[1], SinkRecord::Torrent { name, is_new: false } if name == "b"));
        assert!(matches!(&events[2], SinkRecord::Milestone(10)));
    }

    #[tokio::test]
    async fn test_failing_sink_does_not_stop_others() {
        let failing = Arc::new(MockSink::failing());
        let healthy = Arc::new(MockSink::new());
        let sinks: Vec<Arc<dyn Sink>> = vec![failing.clone(), healthy.clone()];
        let announcer = Announcer::new(sinks);

        announcer.send(true, descriptor("a"));
        announcer.send(true, descriptor("b"));
        announcer.close(Duration::from_secs(1)).await;

        assert_eq!(healthy.events().len(), 2);
    }

    #[tokio::test]
    async fn test_close_invokes_sink_close() {
        let sink = Arc::new(MockSink::new());
        let sinks: Vec<Arc<dyn Sink>> = vec![sink.clone()];
        let announcer = Announcer::new(sinks);
        announcer.close(Duration::from_secs(1)).await;
        assert!(sink.closed());
    }
}
