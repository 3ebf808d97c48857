//! Redis-backed job queues
//!
//! Every named queue lives under `ownerific:queue:{name}` on the broker:
//! a `wait` list fed by producers, an `active` list of jobs being worked,
//! one lock key per active job, a `stalled` hash of stall counts and a
//! capped `failed` list. Two processes that open the same queue name share
//! the same jobs.
//!
//! A worker holds the lock of the job it is running and extends it on a
//! heartbeat. A job whose lock expires is stalled: it goes back on the wait
//! list once, and is failed if it stalls again.

pub mod events;
pub mod job;
mod scripts;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use redis::aio::ConnectionManager;
use redis::Script;
use serde::Serialize;
use tokio::sync::{watch, Mutex, OnceCell};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use uuid::Uuid;

pub use events::{attach_standard_listeners, ErrorSink, QueueEvent, QueueEventKind, QueueListener};
pub use job::{Job, JobError, JobProcessor};

const KEY_PREFIX: &str = "ownerific:queue";
const FAILED_RETENTION: isize = 1000;
/// Upper bound on connecting and pushing from a request handler
const ENQUEUE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Queue {0} is closed")]
    Closed(String),

    #[error("Queue {0} already has a processor")]
    AlreadyProcessing(String),

    #[error("Timed out adding a job to queue {0}")]
    Timeout(String),
}

#[derive(Debug, Clone)]
pub struct QueueOptions {
    /// How often an idle worker looks for new jobs
    pub poll_interval: Duration,
    /// How long a job lock lives without a heartbeat
    pub lock_duration: Duration,
    /// How often active jobs are checked for expired locks
    pub stalled_interval: Duration,
    /// Stalls tolerated before a job is failed
    pub max_stalled_count: u32,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            lock_duration: Duration::from_secs(30),
            stalled_interval: Duration::from_secs(30),
            max_stalled_count: 1,
        }
    }
}

/// Broker key names for one queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct QueueKeys {
    pub wait: String,
    pub active: String,
    pub stalled: String,
    pub failed: String,
    pub lock_prefix: String,
}

impl QueueKeys {
    pub fn for_name(name: &str) -> Self {
        let base = format!("{}:{}", KEY_PREFIX, name);
        Self {
            wait: format!("{}:wait", base),
            active: format!("{}:active", base),
            stalled: format!("{}:stalled", base),
            failed: format!("{}:failed", base),
            lock_prefix: format!("{}:lock:", base),
        }
    }

    pub fn lock(&self, job_id: Uuid) -> String {
        format!("{}{}", self.lock_prefix, job_id)
    }
}

/// Number of jobs in each state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobCounts {
    pub waiting: u64,
    pub active: u64,
    pub failed: u64,
}

/// Connection point to the broker.
///
/// Producers share one lazily opened connection; each [`Queue`] handle opened
/// through [`Broker::queue`] gets its own.
#[derive(Clone)]
pub struct Broker {
    client: redis::Client,
    shared: Arc<OnceCell<ConnectionManager>>,
}

impl Broker {
    pub fn open(url: &str) -> Result<Self, QueueError> {
        Ok(Self {
            client: redis::Client::open(url)?,
            shared: Arc::new(OnceCell::new()),
        })
    }

    /// A handle that can only enqueue. Does not touch the broker until the
    /// first job is added.
    pub fn producer(&self, name: &str) -> Producer {
        Producer {
            name: name.to_string(),
            keys: QueueKeys::for_name(name),
            broker: self.clone(),
        }
    }

    /// Open an independent handle on the queue called `name`
    pub async fn queue(&self, name: &str, options: QueueOptions) -> Result<Queue, QueueError> {
        let conn = ConnectionManager::new(self.client.clone()).await?;
        let (shutdown, _) = watch::channel(false);

        Ok(Queue {
            inner: Arc::new(QueueInner {
                name: name.to_string(),
                handle_id: Uuid::new_v4(),
                keys: QueueKeys::for_name(name),
                conn,
                options,
                fetch_next: Script::new(scripts::FETCH_NEXT),
                recover_stalled: Script::new(scripts::RECOVER_STALLED),
                listeners: RwLock::new(HashMap::new()),
                shutdown,
                worker: Mutex::new(None),
                closed: AtomicBool::new(false),
            }),
        })
    }

    async fn shared_connection(&self) -> Result<ConnectionManager, QueueError> {
        let conn = self
            .shared
            .get_or_try_init(|| ConnectionManager::new(self.client.clone()))
            .await?;
        Ok(conn.clone())
    }
}

/// Enqueue-only handle used by request handlers
#[derive(Clone)]
pub struct Producer {
    name: String,
    keys: QueueKeys,
    broker: Broker,
}

impl Producer {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Enqueue a job. Gives up after a short timeout when the broker is
    /// unreachable.
    pub async fn add<T: Serialize>(&self, job_name: &str, data: &T) -> Result<Job, QueueError> {
        let job = Job::new(&self.name, job_name, data)?;
        let push = async {
            let mut conn = self.broker.shared_connection().await?;
            push_waiting(&mut conn, &self.keys, &job).await?;
            Ok::<_, QueueError>(())
        };
        tokio::time::timeout(ENQUEUE_TIMEOUT, push)
            .await
            .map_err(|_| QueueError::Timeout(self.name.clone()))??;

        tracing::debug!(queue = %self.name, job_id = %job.id, job_name, "Job added");
        Ok(job)
    }
}

async fn push_waiting(
    conn: &mut ConnectionManager,
    keys: &QueueKeys,
    job: &Job,
) -> Result<(), QueueError> {
    redis::cmd("LPUSH")
        .arg(&keys.wait)
        .arg(job.encode()?)
        .query_async::<_, i64>(conn)
        .await?;
    Ok(())
}

/// A queue handle that can enqueue, process and emit events.
#[derive(Clone)]
pub struct Queue {
    inner: Arc<QueueInner>,
}

struct QueueInner {
    name: String,
    handle_id: Uuid,
    keys: QueueKeys,
    conn: ConnectionManager,
    options: QueueOptions,
    fetch_next: Script,
    recover_stalled: Script,
    listeners: RwLock<HashMap<QueueEventKind, Vec<Arc<dyn QueueListener>>>>,
    shutdown: watch::Sender<bool>,
    worker: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl Queue {
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Distinguishes handles on the same queue name
    pub fn handle_id(&self) -> Uuid {
        self.inner.handle_id
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    pub fn on(&self, kind: QueueEventKind, listener: Arc<dyn QueueListener>) {
        if let Ok(mut listeners) = self.inner.listeners.write() {
            listeners.entry(kind).or_default().push(listener);
        }
    }

    pub fn has_listener(&self, kind: QueueEventKind) -> bool {
        self.inner
            .listeners
            .read()
            .map(|listeners| listeners.get(&kind).is_some_and(|l| !l.is_empty()))
            .unwrap_or(false)
    }

    pub async fn add<T: Serialize>(&self, job_name: &str, data: &T) -> Result<Job, QueueError> {
        if self.is_closed() {
            return Err(QueueError::Closed(self.inner.name.clone()));
        }
        let job = Job::new(&self.inner.name, job_name, data)?;
        let mut conn = self.inner.conn.clone();
        push_waiting(&mut conn, &self.inner.keys, &job).await?;
        Ok(job)
    }

    pub async fn counts(&self) -> Result<JobCounts, QueueError> {
        let mut conn = self.inner.conn.clone();
        let (waiting, active, failed): (u64, u64, u64) = redis::pipe()
            .cmd("LLEN")
            .arg(&self.inner.keys.wait)
            .cmd("LLEN")
            .arg(&self.inner.keys.active)
            .cmd("LLEN")
            .arg(&self.inner.keys.failed)
            .query_async(&mut conn)
            .await?;
        Ok(JobCounts {
            waiting,
            active,
            failed,
        })
    }

    /// Start the worker loop for this handle.
    pub async fn process<P: JobProcessor>(&self, processor: P) -> Result<(), QueueError> {
        if self.is_closed() {
            return Err(QueueError::Closed(self.inner.name.clone()));
        }
        let mut worker = self.inner.worker.lock().await;
        if worker.is_some() {
            return Err(QueueError::AlreadyProcessing(self.inner.name.clone()));
        }

        let queue = self.clone();
        let processor: Arc<dyn JobProcessor> = Arc::new(processor);
        let shutdown = self.inner.shutdown.subscribe();
        *worker = Some(tokio::spawn(run_worker(queue, processor, shutdown)));

        tracing::info!(queue = %self.inner.name, handle = %self.inner.handle_id, "Queue worker started");
        Ok(())
    }

    /// Stop taking jobs, let the in-flight job finish, and release the worker.
    /// Safe to call more than once.
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.inner.shutdown.send(true);

        let handle = self.inner.worker.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::error!(queue = %self.inner.name, error = %e, "Queue worker panicked");
            }
        }
        tracing::info!(queue = %self.inner.name, "Queue closed");
    }

    fn emit(&self, event: QueueEvent) {
        let listeners = match self.inner.listeners.read() {
            Ok(listeners) => listeners.get(&event.kind()).cloned().unwrap_or_default(),
            Err(_) => return,
        };
        for listener in listeners {
            listener.on_event(&self.inner.name, &event);
        }
    }

    fn emit_error(&self, error: impl std::fmt::Display) {
        self.emit(QueueEvent::Error {
            message: error.to_string(),
        });
    }

    async fn fetch_next(&self) -> Result<Option<(Job, String)>, QueueError> {
        let mut conn = self.inner.conn.clone();
        let payload: Option<String> = self
            .inner
            .fetch_next
            .key(&self.inner.keys.wait)
            .key(&self.inner.keys.active)
            .arg(&self.inner.keys.lock_prefix)
            .arg(self.inner.options.lock_duration.as_millis() as u64)
            .arg(self.inner.handle_id.to_string())
            .invoke_async(&mut conn)
            .await?;

        match payload {
            Some(payload) => {
                let job = Job::decode(&payload)?;
                Ok(Some((job, payload)))
            }
            None => Ok(None),
        }
    }

    async fn extend_lock(&self, job_id: Uuid) -> Result<(), QueueError> {
        let mut conn = self.inner.conn.clone();
        redis::cmd("PEXPIRE")
            .arg(self.inner.keys.lock(job_id))
            .arg(self.inner.options.lock_duration.as_millis() as u64)
            .query_async::<_, i64>(&mut conn)
            .await?;
        Ok(())
    }

    async fn complete(&self, job: &Job, payload: &str) -> Result<(), QueueError> {
        let keys = &self.inner.keys;
        let mut conn = self.inner.conn.clone();
        redis::pipe()
            .atomic()
            .cmd("LREM")
            .arg(&keys.active)
            .arg(1)
            .arg(payload)
            .ignore()
            .cmd("DEL")
            .arg(keys.lock(job.id))
            .ignore()
            .cmd("HDEL")
            .arg(&keys.stalled)
            .arg(job.id.to_string())
            .ignore()
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn fail(&self, job: &Job, payload: &str, reason: &str) -> Result<(), QueueError> {
        let keys = &self.inner.keys;
        let record = serde_json::json!({
            "job": job,
            "failed_reason": reason,
            "failed_at": chrono::Utc::now(),
        });
        let mut conn = self.inner.conn.clone();
        redis::pipe()
            .atomic()
            .cmd("LREM")
            .arg(&keys.active)
            .arg(1)
            .arg(payload)
            .ignore()
            .cmd("DEL")
            .arg(keys.lock(job.id))
            .ignore()
            .cmd("HDEL")
            .arg(&keys.stalled)
            .arg(job.id.to_string())
            .ignore()
            .cmd("LPUSH")
            .arg(&keys.failed)
            .arg(record.to_string())
            .ignore()
            .cmd("LTRIM")
            .arg(&keys.failed)
            .arg(0)
            .arg(FAILED_RETENTION - 1)
            .ignore()
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    /// Requeue or fail active jobs whose lock has expired
    async fn check_stalled(&self) -> Result<(), QueueError> {
        let keys = &self.inner.keys;
        let mut conn = self.inner.conn.clone();
        let outcomes: Vec<String> = self
            .inner
            .recover_stalled
            .key(&keys.active)
            .key(&keys.wait)
            .key(&keys.stalled)
            .key(&keys.failed)
            .arg(&keys.lock_prefix)
            .arg(self.inner.options.max_stalled_count)
            .arg(FAILED_RETENTION - 1)
            .invoke_async(&mut conn)
            .await?;

        for pair in outcomes.chunks(2) {
            let [outcome, payload] = pair else { continue };
            let job = match Job::decode(payload) {
                Ok(job) => job,
                Err(e) => {
                    self.emit_error(format!("Unreadable stalled job: {}", e));
                    continue;
                }
            };
            self.emit(QueueEvent::Stalled { job: job.clone() });
            if outcome == "failed" {
                self.emit(QueueEvent::Failed {
                    job,
                    reason: "job stalled more than allowable limit".to_string(),
                });
            }
        }
        Ok(())
    }

    async fn run_job(&self, processor: &dyn JobProcessor, job: Job, payload: String) {
        let mut heartbeat = interval(self.inner.options.lock_duration / 2);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        heartbeat.tick().await;

        let result = {
            let work = processor.process(&job);
            tokio::pin!(work);

            loop {
                tokio::select! {
                    result = &mut work => break result,
                    _ = heartbeat.tick() => {
                        if let Err(e) = self.extend_lock(job.id).await {
                            self.emit_error(e);
                        }
                    }
                }
            }
        };

        match result {
            Ok(()) => {
                tracing::debug!(queue = %self.inner.name, job_id = %job.id, "Job completed");
                if let Err(e) = self.complete(&job, &payload).await {
                    self.emit_error(e);
                }
            }
            Err(e) => {
                let reason = e.to_string();
                if let Err(e) = self.fail(&job, &payload, &reason).await {
                    self.emit_error(e);
                }
                self.emit(QueueEvent::Failed { job, reason });
            }
        }
    }
}

async fn run_worker(
    queue: Queue,
    processor: Arc<dyn JobProcessor>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut poll = interval(queue.inner.options.poll_interval);
    poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut stalled = interval(queue.inner.options.stalled_interval);
    stalled.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = stalled.tick() => {
                if let Err(e) = queue.check_stalled().await {
                    queue.emit_error(e);
                }
            }
            _ = poll.tick() => {
                // drain whatever is waiting before sleeping again
                while !*shutdown.borrow() {
                    match queue.fetch_next().await {
                        Ok(Some((job, payload))) => {
                            queue.run_job(processor.as_ref(), job, payload).await;
                        }
                        Ok(None) => break,
                        Err(e) => {
                            queue.emit_error(e);
                            break;
                        }
                    }
                }
            }
        }
    }

    tracing::debug!(queue = %queue.inner.name, "Queue worker stopped");
}
