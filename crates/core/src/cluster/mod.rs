//! Single-master election and liveness over a NATS request/reply bus.
//!
//! Followers probe the master subject; enough unanswered probes push a node
//! into the propose phase, where the propose subject doubles as a tie
//! breaker: every candidate replies to proposals that are not its own, so a
//! candidate that hears a reply backs off while a candidate that hears
//! nothing takes the master subscription and starts the crawl.

use std::sync::Arc;
use std::time::Duration;

use async_nats::client::RequestErrorKind;
use futures::StreamExt;
use rand::rngs::OsRng;
use rand::{Rng, RngCore, SeedableRng};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Errors surfaced by the coordinator itself; everything after the initial
/// connect is handled by reconnection and the election loop.
#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("cluster configuration: {0}")]
    Config(String),

    #[error("bus: {0}")]
    Bus(String),
}

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// The seam the observer wiring supplies: what to do on winning and losing
/// mastership.
#[async_trait::async_trait]
pub trait MasterControl: Send + Sync {
    async fn start(&self) -> Result<(), BoxError>;
    async fn suspend(&self);
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClusterConfig {
    pub url: String,
    pub mastersubject: String,
    pub masterproposesubject: String,
    /// Base follower poll interval, seconds.
    #[serde(default = "default_ping_interval")]
    pub masterpinginterval: u64,
    /// Bus request deadline, milliseconds.
    #[serde(default = "default_max_wait")]
    pub msgmaxwait: u64,
    /// Unanswered probes before proposing.
    #[serde(default = "default_retry_count")]
    pub masterretrycount: u32,
}

fn default_ping_interval() -> u64 {
    10
}

fn default_max_wait() -> u64 {
    500
}

fn default_retry_count() -> u32 {
    3
}

pub struct Coordinator {
    config: ClusterConfig,
    control: Arc<dyn MasterControl>,
    shutdown: watch::Sender<bool>,
    task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl Coordinator {
    pub fn new(config: ClusterConfig, control: Arc<dyn MasterControl>) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            config,
            control,
            shutdown,
            task: std::sync::Mutex::new(None),
        }
    }

    /// Connect to the bus and enter the follower loop in a background task.
    pub async fn start(&self) -> Result<(), ClusterError> {
        if self.config.url.is_empty()
            || self.config.mastersubject.is_empty()
            || self.config.masterproposesubject.is_empty()
        {
            return Err(ClusterError::Config(
                "bus url or subjects not set".to_string(),
            ));
        }
        let ping = Duration::from_secs(self.config.masterpinginterval.max(1));
        let client = async_nats::ConnectOptions::new()
            .ping_interval(ping / 3)
            .request_timeout(Some(Duration::from_millis(self.config.msgmaxwait.max(1))))
            .connect(&self.config.url)
            .await
            .map_err(|e| ClusterError::Bus(e.to_string()))?;

        let mut node_id = [0u8; 8];
        OsRng.fill_bytes(&mut node_id);
        info!(node = %hex::encode(node_id), "joined cluster as follower");

        let election = Election {
            client,
            config: self.config.clone(),
            control: Arc::clone(&self.control),
            node_id,
        };
        let task = tokio::spawn(election.run(self.shutdown.subscribe()));
        *self.task.lock().unwrap() = Some(task);
        Ok(())
    }

    /// Leave the cluster: suspend, drop subscriptions, close the bus.
    pub async fn stop(&self) {
        let _ = self.shutdown.send(true);
        let task = self.task.lock().unwrap().take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}

struct Election {
    client: async_nats::Client,
    config: ClusterConfig,
    control: Arc<dyn MasterControl>,
    node_id: [u8; 8],
}

impl Election {
    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        // The node id seeds the jitter generator; the id itself came from
        // the OS entropy source.
        let mut rng = rand::rngs::StdRng::seed_from_u64(u64::from_le_bytes(self.node_id));
        let interval = self.config.masterpinginterval.max(1);
        let mut errors: u32 = 0;
        let mut master_task: Option<JoinHandle<()>> = None;

        loop {
            if master_task.is_none() {
                match self
                    .client
                    .request(
                        self.config.mastersubject.clone(),
                        self.node_id.to_vec().into(),
                    )
                    .await
                {
                    Ok(reply) => {
                        errors = 0;
                        debug!(master = %hex::encode(&reply.payload), "master alive");
                    }
                    Err(e) => {
                        let connected = self.client.connection_state()
                            == async_nats::connection::State::Connected;
                        if escalates(e.kind(), connected) {
                            errors += 1;
                            warn!(errors, "master did not respond");
                            if errors >= self.config.masterretrycount {
                                match self.propose().await {
                                    Ok(Some(task)) => {
                                        master_task = Some(task);
                                        errors = 0;
                                    }
                                    Ok(None) => errors = 0,
                                    Err(e) => error!(error = %e, "propose failed"),
                                }
                            }
                        } else {
                            warn!(error = %e, "bus error during master ping");
                        }
                    }
                }
            }

            let sleep = Duration::from_secs(interval + rng.gen_range(0..interval));
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = tokio::time::sleep(sleep) => {}
            }
        }

        if let Some(task) = master_task {
            task.abort();
        }
        self.control.suspend().await;
    }

    /// The propose phase. `Ok(Some(_))` carries the master responder task
    /// when this node won; `Ok(None)` means another candidate was heard (or
    /// starting failed) and the node stays a follower.
    async fn propose(&self) -> Result<Option<JoinHandle<()>>, ClusterError> {
        info!("beginning master propose");
        let responder = self
            .spawn_responder(&self.config.masterproposesubject)
            .await?;

        let outcome = self
            .client
            .request(
                self.config.masterproposesubject.clone(),
                self.node_id.to_vec().into(),
            )
            .await;

        let result = match outcome {
            Ok(reply) => {
                info!(candidate = %hex::encode(&reply.payload), "another candidate proposed first");
                Ok(None)
            }
            // Our own propose subscription never answers itself, so a lone
            // candidate sees a timeout rather than NoResponders.
            Err(e) if matches!(e.kind(), RequestErrorKind::NoResponders | RequestErrorKind::TimedOut) => {
                info!("no competing candidate, becoming master");
                let master = self.spawn_responder(&self.config.mastersubject).await?;
                match self.control.start().await {
                    Ok(()) => Ok(Some(master)),
                    Err(e) => {
                        error!(error = %e, "master start failed, suspending");
                        master.abort();
                        self.control.suspend().await;
                        Ok(None)
                    }
                }
            }
            Err(e) => Err(ClusterError::Bus(e.to_string())),
        };

        responder.abort();
        result
    }

    /// Subscribe to a subject and reply with our id to every message that is
    /// not our own (anti-self).
    async fn spawn_responder(&self, subject: &str) -> Result<JoinHandle<()>, ClusterError> {
        let mut subscription = self
            .client
            .subscribe(subject.to_string())
            .await
            .map_err(|e| ClusterError::Bus(e.to_string()))?;
        let client = self.client.clone();
        let node_id = self.node_id;
        Ok(tokio::spawn(async move {
            while let Some(message) = subscription.next().await {
                if message.payload.as_ref() == node_id {
                    continue;
                }
                if let Some(reply) = message.reply {
                    if let Err(e) = client.publish(reply, node_id.to_vec().into()).await {
                        warn!(error = %e, "liveness reply failed");
                    }
                }
            }
        }))
    }
}

/// Whether a failed probe counts toward "master down".
///
/// A timeout while disconnected blames the disconnect, not the master.
fn escalates(kind: RequestErrorKind, connected: bool) -> bool {
    match kind {
        RequestErrorKind::NoResponders => true,
        RequestErrorKind::TimedOut => connected,
        RequestErrorKind::Other => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escalation_classification() {
        assert!(escalates(RequestErrorKind::NoResponders, true));
        assert!(escalates(RequestErrorKind::NoResponders, false));
        assert!(escalates(RequestErrorKind::TimedOut, true));
        assert!(!escalates(RequestErrorKind::TimedOut, false));
        assert!(!escalates(RequestErrorKind::Other, true));
    }

    #[test]
    fn test_jitter_stays_within_one_interval() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        for _ in 0..1000 {
            let interval = 10u64;
            let sleep = interval + rng.gen_range(0..interval);
            assert!((10..20).contains(&sleep));
        }
    }

    #[test]
    fn test_node_ids_differ() {
        let mut a = [0u8; 8];
        let mut b = [0u8; 8];
        OsRng.fill_bytes(&mut a);
        OsRng.fill_bytes(&mut b);
        assert_ne!(a, b);
    }

    #[test]
    fn test_config_defaults() {
        let config: ClusterConfig = serde_json::from_str(
            r#"{
                "url": "nats://localhost:4222",
                "mastersubject": "tt.master",
                "masterproposesubject": "tt.propose"
            }"#,
        )
        .unwrap();
        assert_eq!(config.masterpinginterval, 10);
        assert_eq!(config.msgmaxwait, 500);
        assert_eq!(config.masterretrycount, 3);
    }
}
