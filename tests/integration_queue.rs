//! Queue integration tests
//!
//! Run only when `REDIS_URL` is set. Every test uses its own queue name.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use tokio::sync::mpsc;
use uuid::Uuid;

use ownerific_api::queue::{
    attach_standard_listeners, Broker, ErrorSink, Job, JobError, JobProcessor, QueueError,
    QueueOptions,
};

const WAIT: Duration = Duration::from_secs(5);

fn redis_url() -> Option<String> {
    dotenvy::dotenv().ok();
    match std::env::var("REDIS_URL") {
        Ok(url) => Some(url),
        Err(_) => {
            eprintln!("REDIS_URL not set; skipping queue test");
            None
        }
    }
}

fn broker() -> Option<Broker> {
    redis_url().map(|url| Broker::open(&url).unwrap())
}

/// Raw connection for arranging broker state by hand
async fn raw_connection(url: &str) -> ConnectionManager {
    ConnectionManager::new(redis::Client::open(url).unwrap())
        .await
        .unwrap()
}

fn key(queue: &str, suffix: &str) -> String {
    format!("ownerific:queue:{queue}:{suffix}")
}

/// Leave a job on the active list with no lock, as a crashed worker would
async fn orphan_active_job(conn: &mut ConnectionManager, queue: &str) -> (Job, String) {
    let job = Job::new(queue, "purgeExpired", &serde_json::json!({})).unwrap();
    let payload = serde_json::to_string(&job).unwrap();
    redis::cmd("LPUSH")
        .arg(key(queue, "active"))
        .arg(&payload)
        .query_async::<_, i64>(conn)
        .await
        .unwrap();
    (job, payload)
}

fn stall_options() -> QueueOptions {
    QueueOptions {
        poll_interval: Duration::from_millis(50),
        stalled_interval: Duration::from_millis(50),
        lock_duration: Duration::from_millis(500),
        max_stalled_count: 1,
    }
}

async fn wait_until(mut done: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + WAIT;
    while !done() && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

fn fast_options() -> QueueOptions {
    QueueOptions {
        poll_interval: Duration::from_millis(50),
        ..QueueOptions::default()
    }
}

fn unique_name(prefix: &str) -> String {
    format!("{prefix}-{}", Uuid::new_v4().simple())
}

/// Forwards processed jobs to the test; jobs named `boom` fail
struct Recorder(mpsc::UnboundedSender<Job>);

#[async_trait]
impl JobProcessor for Recorder {
    async fn process(&self, job: &Job) -> Result<(), JobError> {
        if job.name == "boom" {
            return Err(JobError::Failed("exploded on purpose".to_string()));
        }
        let _ = self.0.send(job.clone());
        Ok(())
    }
}

#[tokio::test]
async fn test_handles_on_one_name_share_jobs() {
    let Some(broker) = broker() else { return };
    let name = unique_name("SessionQueue");

    let producer = broker.queue(&name, fast_options()).await.unwrap();
    let worker = broker.queue(&name, fast_options()).await.unwrap();
    assert_eq!(producer.name(), worker.name());
    assert_ne!(producer.handle_id(), worker.handle_id());

    let (tx, mut rx) = mpsc::unbounded_channel();
    worker.process(Recorder(tx)).await.unwrap();

    let sent = producer
        .add("purgeExpired", &serde_json::json!({"sessionableId": Uuid::nil()}))
        .await
        .unwrap();

    let received = tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("job was not processed in time")
        .unwrap();
    assert_eq!(received.id, sent.id);
    assert_eq!(received.name, "purgeExpired");
    assert_eq!(received.queue, name);

    producer.close().await;
    worker.close().await;
    worker.close().await;
    assert!(worker.is_closed());

    assert!(matches!(
        producer.add("purgeExpired", &serde_json::json!({})).await,
        Err(QueueError::Closed(_))
    ));
}

#[tokio::test]
async fn test_failed_job_reaches_listeners() {
    let Some(broker) = broker() else { return };
    let name = unique_name("PlaidAccountQueue");

    let queue = broker.queue(&name, fast_options()).await.unwrap();
    let sink = ErrorSink::new();
    attach_standard_listeners(&queue, sink.clone());

    let (tx, _rx) = mpsc::unbounded_channel();
    queue.process(Recorder(tx)).await.unwrap();
    queue.add("boom", &serde_json::json!({})).await.unwrap();

    let deadline = tokio::time::Instant::now() + WAIT;
    while sink.counts().failed == 0 && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert_eq!(sink.counts().failed, 1);

    let counts = queue.counts().await.unwrap();
    assert_eq!(counts.failed, 1);
    assert_eq!(counts.active, 0);

    queue.close().await;
}

#[tokio::test]
async fn test_second_processor_is_refused() {
    let Some(broker) = broker() else { return };
    let queue = broker
        .queue(&unique_name("SessionQueue"), fast_options())
        .await
        .unwrap();

    let (tx, _rx) = mpsc::unbounded_channel();
    queue.process(Recorder(tx.clone())).await.unwrap();
    assert!(matches!(
        queue.process(Recorder(tx)).await,
        Err(QueueError::AlreadyProcessing(_))
    ));

    queue.close().await;
}

#[tokio::test]
async fn test_unlocked_active_job_is_requeued_and_run() {
    let Some(url) = redis_url() else { return };
    let name = unique_name("SessionQueue");
    let mut conn = raw_connection(&url).await;
    let (job, _) = orphan_active_job(&mut conn, &name).await;

    let queue = Broker::open(&url)
        .unwrap()
        .queue(&name, stall_options())
        .await
        .unwrap();
    let sink = ErrorSink::new();
    attach_standard_listeners(&queue, sink.clone());

    let (tx, mut rx) = mpsc::unbounded_channel();
    queue.process(Recorder(tx)).await.unwrap();

    let received = tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("stalled job was not run again")
        .unwrap();
    assert_eq!(received.id, job.id);

    let counts = sink.counts();
    assert_eq!(counts.stalled, 1);
    assert_eq!(counts.failed, 0);

    queue.close().await;
}

#[tokio::test]
async fn test_job_stalled_too_often_is_failed_and_capped() {
    let Some(url) = redis_url() else { return };
    let name = unique_name("PlaidAccountQueue");
    let mut conn = raw_connection(&url).await;

    // A full failed list, then a job that already stalled once
    let filler: Vec<String> = (0..1000).map(|i| format!("old-{i}")).collect();
    redis::cmd("RPUSH")
        .arg(key(&name, "failed"))
        .arg(&filler)
        .query_async::<_, i64>(&mut conn)
        .await
        .unwrap();
    let (job, payload) = orphan_active_job(&mut conn, &name).await;
    redis::cmd("HSET")
        .arg(key(&name, "stalled"))
        .arg(job.id.to_string())
        .arg(1)
        .query_async::<_, i64>(&mut conn)
        .await
        .unwrap();

    let queue = Broker::open(&url)
        .unwrap()
        .queue(&name, stall_options())
        .await
        .unwrap();
    let sink = ErrorSink::new();
    attach_standard_listeners(&queue, sink.clone());

    let (tx, mut rx) = mpsc::unbounded_channel();
    queue.process(Recorder(tx)).await.unwrap();

    wait_until(|| sink.counts().failed > 0).await;
    let counts = sink.counts();
    assert_eq!(counts.failed, 1);
    assert_eq!(counts.stalled, 1);
    assert!(rx.try_recv().is_err());

    let queued = queue.counts().await.unwrap();
    assert_eq!(queued.active, 0);
    assert_eq!(queued.waiting, 0);
    assert_eq!(queued.failed, 1000);

    let newest: String = redis::cmd("LINDEX")
        .arg(key(&name, "failed"))
        .arg(0)
        .query_async(&mut conn)
        .await
        .unwrap();
    assert_eq!(newest, payload);

    queue.close().await;
    redis::cmd("DEL")
        .arg(key(&name, "failed"))
        .arg(key(&name, "stalled"))
        .query_async::<_, i64>(&mut conn)
        .await
        .unwrap();
}
