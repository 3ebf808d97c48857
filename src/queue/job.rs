//! Jobs and job processors

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A unit of background work as stored on the broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub queue: String,
    pub name: String,
    pub data: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl Job {
    pub fn new<T: Serialize>(queue: &str, name: &str, data: &T) -> Result<Self, serde_json::Error> {
        Ok(Self {
            id: Uuid::new_v4(),
            queue: queue.to_string(),
            name: name.to_string(),
            data: serde_json::to_value(data)?,
            created_at: Utc::now(),
        })
    }

    /// Decode the job data into the processor's payload type
    pub fn payload<T: DeserializeOwned>(&self) -> Result<T, JobError> {
        Ok(serde_json::from_value(self.data.clone())?)
    }

    pub(crate) fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub(crate) fn decode(payload: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(payload)
    }
}

/// Why a job did not complete
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Invalid job payload: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Unknown job name: {0}")]
    UnknownJob(String),

    #[error("{0}")]
    Failed(String),
}

/// Handles the jobs of one queue.
#[async_trait]
pub trait JobProcessor: Send + Sync + 'static {
    async fn process(&self, job: &Job) -> Result<(), JobError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Payload {
        plaid_account_id: Uuid,
    }

    #[test]
    fn test_payload_decodes() {
        let id = Uuid::new_v4();
        let job = Job::new("PlaidAccountQueue", "link", &Payload { plaid_account_id: id }).unwrap();
        let payload: Payload = job.payload().unwrap();
        assert_eq!(payload.plaid_account_id, id);
    }

    #[test]
    fn test_encode_decode_preserves_id() {
        let job = Job::new("SessionQueue", "purge", &serde_json::json!({})).unwrap();
        let decoded = Job::decode(&job.encode().unwrap()).unwrap();
        assert_eq!(decoded, job);
    }

    #[test]
    fn test_wrong_payload_shape() {
        let job = Job::new("PlaidAccountQueue", "link", &serde_json::json!({"x": 1})).unwrap();
        assert!(matches!(job.payload::<Payload>(), Err(JobError::Payload(_))));
    }
}
