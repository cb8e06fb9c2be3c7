use crate::database::DbClient;
use crate::error::{Error, Result};
use crate::models::{ContainerRecord, ContainerStatus, ContainerType};
use dashmap::DashMap;
use log::*;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Sent on a worker's completion channel when its command returns. Carries
/// the ship so the coordinator can resume scheduling it immediately.
#[derive(Debug, Clone)]
pub struct CompletionSignal {
    pub container_id: String,
    pub ship_symbol: Option<String>,
}

pub type CompletionSender = mpsc::Sender<CompletionSignal>;
pub type CompletionReceiver = mpsc::Receiver<CompletionSignal>;

/// Bounded(1) channel: a completion signal either lands while the
/// coordinator is (about to be) listening, or is dropped with a log line.
/// No ghost signals pile up after the coordinator has moved on.
pub fn completion_channel() -> (CompletionSender, CompletionReceiver) {
    mpsc::channel(1)
}

/// Persists container records and runs their commands as tracked tokio
/// tasks under a child cancellation token. PERSISTED -> RUNNING -> STOPPED;
/// the STOPPED mark happens on every exit path.
#[derive(Clone)]
pub struct ContainerManager {
    db: DbClient,
    player_id: String,
    running: Arc<DashMap<String, CancellationToken>>,
    tracker: TaskTracker,
    root_token: CancellationToken,
}

impl ContainerManager {
    pub fn new(player_id: &str, db: &DbClient) -> Self {
        Self {
            db: db.clone(),
            player_id: player_id.to_string(),
            running: Arc::new(DashMap::new()),
            tracker: TaskTracker::new(),
            root_token: CancellationToken::new(),
        }
    }

    pub fn root_token(&self) -> &CancellationToken {
        &self.root_token
    }

    pub async fn persist(&self, record: &ContainerRecord) {
        assert_eq!(record.status, ContainerStatus::Persisted);
        self.db.insert_container(record).await;
    }

    /// Transition PERSISTED -> RUNNING and execute the container's command
    /// in a new task. The command factory receives the container's
    /// cancellation token; `Stop` fires it.
    pub async fn start<F, Fut>(
        &self,
        container_id: &str,
        ship_symbol: Option<String>,
        completion: Option<CompletionSender>,
        command: F,
    ) where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let token = self.root_token.child_token();
        self.running.insert(container_id.to_string(), token.clone());
        self.db
            .update_container_status(container_id, ContainerStatus::Running)
            .await;
        debug!("Starting container {}", container_id);

        let fut = command(token);
        let db = self.db.clone();
        let running = self.running.clone();
        let container_id = container_id.to_string();
        self.tracker.spawn(async move {
            match fut.await {
                Ok(()) => debug!("Container {} completed", container_id),
                Err(Error::Cancelled) => debug!("Container {} cancelled", container_id),
                Err(e) => error!("Container {} failed: {}", container_id, e),
            }
            db.update_container_status(&container_id, ContainerStatus::Stopped)
                .await;
            running.remove(&container_id);
            if let Some(completion) = completion {
                let signal = CompletionSignal {
                    container_id: container_id.clone(),
                    ship_symbol,
                };
                if completion.try_send(signal).is_err() {
                    debug!(
                        "Completion signal for {} dropped (no listener)",
                        container_id
                    );
                }
            }
        });
    }

    /// Request cancellation of the running command and mark STOPPED.
    /// Idempotent; stopping an already-stopped container is a no-op.
    pub async fn stop(&self, container_id: &str) {
        if let Some((_, token)) = self.running.remove(container_id) {
            debug!("Stopping container {}", container_id);
            token.cancel();
        }
        self.db
            .update_container_status(container_id, ContainerStatus::Stopped)
            .await;
    }

    pub fn is_running(&self, container_id: &str) -> bool {
        self.running.contains_key(container_id)
    }

    pub async fn find_existing_workers(
        &self,
        container_type: ContainerType,
    ) -> Vec<ContainerRecord> {
        self.db.find_containers(container_type, &self.player_id).await
    }

    pub async fn find_running_workers(
        &self,
        container_type: ContainerType,
    ) -> Vec<ContainerRecord> {
        self.db
            .find_running_containers(container_type, &self.player_id)
            .await
    }

    pub async fn remove(&self, container_id: &str) {
        self.db.delete_container(container_id, &self.player_id).await;
    }

    /// Cancel everything and wait for all container tasks to wind down.
    pub async fn shutdown(&self) {
        info!("Shutting down container manager");
        self.root_token.cancel();
        self.tracker.close();
        self.tracker.wait().await;
    }
}
