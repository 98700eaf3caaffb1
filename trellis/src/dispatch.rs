use std::{collections::HashMap, sync::Arc};

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde_json::Value;
use tokio::{
    sync::{Mutex, RwLock, Semaphore, mpsc},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

/// A unit of background work executed by the pool. Handlers observe the
/// cancellation token cooperatively; committed side effects are not undone.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn run(&self, args: Value, cancel: CancellationToken) -> Result<()>;
}

/// Task dispatch port: fire-and-track semantics with best-effort revocation.
#[async_trait]
pub trait TaskDispatcher: Send + Sync {
    async fn dispatch(&self, task_name: &str, args: Value) -> Result<String>;
    async fn cancel_task(&self, task_id: &str, terminate: bool) -> Result<()>;
}

struct TaskEnvelope {
    task_id: String,
    task_name: String,
    args: Value,
    cancel: CancellationToken,
}

struct TaskEntry {
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

/// Bounded in-process worker pool: the mpsc queue gives dispatch
/// backpressure, the semaphore bounds concurrent task slots independently of
/// the async scheduler.
pub struct WorkerPool {
    tx: mpsc::Sender<TaskEnvelope>,
    rx: Mutex<Option<mpsc::Receiver<TaskEnvelope>>>,
    handlers: RwLock<HashMap<String, Arc<dyn TaskHandler>>>,
    tasks: Arc<Mutex<HashMap<String, TaskEntry>>>,
    slots: Arc<Semaphore>,
    shutdown: CancellationToken,
}

impl WorkerPool {
    pub fn new(pool_size: usize, queue_depth: usize) -> Self {
        let (tx, rx) = mpsc::channel(queue_depth.max(1));
        Self {
            tx,
            rx: Mutex::new(Some(rx)),
            handlers: RwLock::new(HashMap::new()),
            tasks: Arc::new(Mutex::new(HashMap::new())),
            slots: Arc::new(Semaphore::new(pool_size.max(1))),
            shutdown: CancellationToken::new(),
        }
    }

    pub async fn register_handler(&self, task_name: &str, handler: Arc<dyn TaskHandler>) {
        self.handlers
            .write()
            .await
            .insert(task_name.to_string(), handler);
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Drains the queue until shutdown. Call once after handler registration.
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let pool = Arc::clone(self);
        tokio::spawn(async move {
            let mut rx = match pool.rx.lock().await.take() {
                Some(rx) => rx,
                None => {
                    warn!("worker pool already started");
                    return;
                }
            };

            loop {
                let envelope = tokio::select! {
                    _ = pool.shutdown.cancelled() => break,
                    maybe = rx.recv() => match maybe {
                        Some(envelope) => envelope,
                        None => break,
                    },
                };

                let permit = match Arc::clone(&pool.slots).acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => break,
                };

                let handler = pool
                    .handlers
                    .read()
                    .await
                    .get(&envelope.task_name)
                    .cloned();
                let tasks = Arc::clone(&pool.tasks);

                let TaskEnvelope {
                    task_id,
                    task_name,
                    args,
                    cancel,
                } = envelope;

                let worker_id = task_id.clone();
                let handle = tokio::spawn(async move {
                    let _permit = permit;
                    if cancel.is_cancelled() {
                        info!(task_id = %worker_id, "task revoked before start");
                    } else {
                        match handler {
                            Some(handler) => {
                                if let Err(err) = handler.run(args, cancel).await {
                                    error!(error = %err, task_id = %worker_id, task = %task_name, "task failed");
                                }
                            }
                            None => {
                                error!(task_id = %worker_id, task = %task_name, "no handler registered");
                            }
                        }
                    }
                    tasks.lock().await.remove(&worker_id);
                });

                if let Some(entry) = pool.tasks.lock().await.get_mut(&task_id) {
                    entry.handle = Some(handle);
                }
            }

            info!("worker pool stopped");
        })
    }
}

#[async_trait]
impl TaskDispatcher for WorkerPool {
    async fn dispatch(&self, task_name: &str, args: Value) -> Result<String> {
        let task_id = format!("task-{}", Uuid::new_v4());
        let cancel = self.shutdown.child_token();

        self.tasks.lock().await.insert(
            task_id.clone(),
            TaskEntry {
                cancel: cancel.clone(),
                handle: None,
            },
        );

        self.tx
            .send(TaskEnvelope {
                task_id: task_id.clone(),
                task_name: task_name.to_string(),
                args,
                cancel,
            })
            .await
            .map_err(|_| anyhow!("worker pool is shut down"))?;

        Ok(task_id)
    }

    async fn cancel_task(&self, task_id: &str, terminate: bool) -> Result<()> {
        let mut tasks = self.tasks.lock().await;
        match tasks.get_mut(task_id) {
            Some(entry) => {
                entry.cancel.cancel();
                if terminate {
                    if let Some(handle) = entry.handle.take() {
                        handle.abort();
                    }
                    tasks.remove(task_id);
                }
                Ok(())
            }
            None => Ok(()), // already finished; revocation is best-effort
        }
    }
}
