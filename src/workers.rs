//! Background worker registration
//!
//! Asks every feature for its queues at boot and keeps the handles so the
//! process can close them on shutdown.

use std::sync::Arc;

use sqlx::PgPool;

use crate::config::Config;
use crate::features::Feature;
use crate::queue::{
    attach_standard_listeners, Broker, ErrorSink, Queue, QueueError, QueueEventKind, QueueOptions,
};

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Queue {queue} has no {kind} listener")]
    MissingListener { queue: String, kind: &'static str },
}

/// Everything a feature needs to open and run its queues
#[derive(Clone)]
pub struct WorkerContext {
    pub broker: Broker,
    pub pool: PgPool,
    pub config: Arc<Config>,
    pub sink: Arc<ErrorSink>,
    pub options: QueueOptions,
}

impl WorkerContext {
    /// Open a queue handle with the standard listeners attached
    pub async fn open_queue(&self, name: &str) -> Result<Queue, QueueError> {
        let queue = self.broker.queue(name, self.options.clone()).await?;
        attach_standard_listeners(&queue, self.sink.clone());
        Ok(queue)
    }
}

/// Queues owned by the running process
#[derive(Default)]
pub struct WorkerSet {
    queues: Vec<Queue>,
}

impl WorkerSet {
    pub async fn register(
        features: &[Box<dyn Feature>],
        ctx: &WorkerContext,
    ) -> Result<Self, WorkerError> {
        let mut set = Self::default();
        for feature in features {
            let queues = match feature.register_background_work(ctx).await {
                Ok(queues) => queues,
                Err(e) => {
                    set.shutdown().await;
                    return Err(e.into());
                }
            };
            let mut pending = queues.into_iter();
            while let Some(queue) = pending.next() {
                if let Err(e) = set.push(queue.clone()) {
                    queue.close().await;
                    for rest in pending {
                        rest.close().await;
                    }
                    set.shutdown().await;
                    return Err(e);
                }
                tracing::info!(feature = feature.name(), queue = queue.name(), "Queue registered");
            }
        }
        Ok(set)
    }

    /// Take ownership of a queue, refusing one without the standard listeners
    pub fn push(&mut self, queue: Queue) -> Result<(), WorkerError> {
        if let Some(kind) = QueueEventKind::STANDARD
            .iter()
            .find(|kind| !queue.has_listener(**kind))
        {
            return Err(WorkerError::MissingListener {
                queue: queue.name().to_string(),
                kind: kind.as_str(),
            });
        }
        self.queues.push(queue);
        Ok(())
    }

    pub fn queues(&self) -> &[Queue] {
        &self.queues
    }

    /// Close every queue, waiting for in-flight jobs
    pub async fn shutdown(&mut self) {
        for queue in self.queues.drain(..) {
            queue.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use axum::Router;
    use sqlx::postgres::PgPoolOptions;
    use uuid::Uuid;

    use super::*;
    use crate::api::AppState;
    use crate::error::ErrorCode;

    fn context() -> Option<WorkerContext> {
        let url = std::env::var("REDIS_URL").ok()?;
        let config = Config::from_lookup(|key| match key {
            "DATABASE_URL" => Some("postgres://localhost/unused".to_string()),
            "JWT_SECRET" => Some("secret".to_string()),
            _ => None,
        })
        .unwrap();

        Some(WorkerContext {
            broker: Broker::open(&url).unwrap(),
            pool: PgPoolOptions::new()
                .connect_lazy("postgres://localhost/unused")
                .unwrap(),
            config: Arc::new(config),
            sink: ErrorSink::new(),
            options: QueueOptions::default(),
        })
    }

    /// Opens one queue and remembers the handle
    struct OneQueue {
        listeners: bool,
        opened: Arc<Mutex<Vec<Queue>>>,
    }

    #[async_trait]
    impl Feature for OneQueue {
        fn name(&self) -> &'static str {
            "OneQueue"
        }

        fn path(&self) -> &'static str {
            "oneQueue"
        }

        fn error_prefix(&self) -> &'static str {
            "ONE_QUEUE"
        }

        fn routes(&self) -> Router<AppState> {
            Router::new()
        }

        fn errors(&self) -> &'static [ErrorCode] {
            &[]
        }

        fn strings(&self) -> &'static [(&'static str, &'static str)] {
            &[]
        }

        async fn register_background_work(
            &self,
            ctx: &WorkerContext,
        ) -> Result<Vec<Queue>, QueueError> {
            let name = format!("WorkerSetTest-{}", Uuid::new_v4().simple());
            let queue = if self.listeners {
                ctx.open_queue(&name).await?
            } else {
                ctx.broker.queue(&name, ctx.options.clone()).await?
            };
            self.opened.lock().unwrap().push(queue.clone());
            Ok(vec![queue])
        }
    }

    fn feature(listeners: bool, opened: &Arc<Mutex<Vec<Queue>>>) -> Box<dyn Feature> {
        Box::new(OneQueue {
            listeners,
            opened: opened.clone(),
        })
    }

    #[tokio::test]
    async fn test_register_refuses_queue_without_listeners() {
        let Some(ctx) = context() else { return };
        let opened = Arc::new(Mutex::new(Vec::new()));
        let features = vec![feature(true, &opened), feature(false, &opened)];

        let err = WorkerSet::register(&features, &ctx).await.err().unwrap();
        assert!(matches!(err, WorkerError::MissingListener { kind: "failed", .. }));

        // The accepted queue is closed along with the refused one
        let opened = opened.lock().unwrap().clone();
        assert_eq!(opened.len(), 2);
        assert!(opened.iter().all(Queue::is_closed));
    }

    #[tokio::test]
    async fn test_push_names_the_missing_listener() {
        let Some(ctx) = context() else { return };
        let queue = ctx
            .broker
            .queue("WorkerSetTest-partial", QueueOptions::default())
            .await
            .unwrap();
        queue.on(QueueEventKind::Failed, ctx.sink.clone());

        let mut set = WorkerSet::default();
        let err = set.push(queue.clone()).unwrap_err();
        assert!(matches!(err, WorkerError::MissingListener { kind: "stalled", .. }));
        assert!(set.queues().is_empty());

        queue.close().await;
    }

    #[tokio::test]
    async fn test_shutdown_closes_every_queue() {
        let Some(ctx) = context() else { return };
        let opened = Arc::new(Mutex::new(Vec::new()));
        let features = vec![feature(true, &opened), feature(true, &opened)];

        let mut set = WorkerSet::register(&features, &ctx).await.unwrap();
        assert_eq!(set.queues().len(), 2);

        set.shutdown().await;
        assert!(set.queues().is_empty());
        assert!(opened.lock().unwrap().iter().all(Queue::is_closed));
    }
}
