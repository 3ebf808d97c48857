//! Dwolla client
//!
//! One client-credentials token request followed by one funding-source
//! request. Failures are returned to the caller as-is; there is no retry.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE, LOCATION};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::config::DwollaConfig;

const HAL_JSON: &str = "application/vnd.dwolla.v1.hal+json";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum DwollaError {
    #[error("Dwolla request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Dwolla returned {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("Could not encode Dwolla request: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Dwolla response is missing the Location header")]
    MissingLocation,

    #[error("Dwolla is not configured")]
    NotConfigured,

    #[error("Not a Dwolla customer of this environment: {0}")]
    ForeignCustomer(String),
}

/// Attaches a bank account to a Dwolla customer
#[async_trait]
pub trait FundingSourceLinker: Send + Sync {
    /// Returns the URL of the created funding source
    async fn create_funding_source(
        &self,
        customer_url: &str,
        processor_token: &str,
        name: &str,
    ) -> Result<String, DwollaError>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FundingSourceRequest<'a> {
    plaid_token: &'a str,
    name: &'a str,
}

pub struct DwollaClient {
    config: DwollaConfig,
    client: Client,
}

impl DwollaClient {
    pub fn new(config: DwollaConfig) -> Result<Self, DwollaError> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self { config, client })
    }

    async fn access_token(&self) -> Result<String, DwollaError> {
        let url = format!("{}/token", self.config.environment.api_base());

        let response = self
            .client
            .post(&url)
            .basic_auth(&self.config.app_key, Some(&self.config.app_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(rejected(response).await);
        }

        Ok(response.json::<TokenResponse>().await?.access_token)
    }
}

#[async_trait]
impl FundingSourceLinker for DwollaClient {
    async fn create_funding_source(
        &self,
        customer_url: &str,
        processor_token: &str,
        name: &str,
    ) -> Result<String, DwollaError> {
        // The access token must only ever be sent to Dwolla itself
        if !self.config.environment.is_customer_url(customer_url) {
            return Err(DwollaError::ForeignCustomer(customer_url.to_string()));
        }

        let token = self.access_token().await?;
        let body = serde_json::to_vec(&FundingSourceRequest {
            plaid_token: processor_token,
            name,
        })?;

        let response = self
            .client
            .post(format!("{}/funding-sources", customer_url.trim_end_matches('/')))
            .bearer_auth(token)
            .header(ACCEPT, HAL_JSON)
            .header(CONTENT_TYPE, HAL_JSON)
            .body(body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(rejected(response).await);
        }

        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or(DwollaError::MissingLocation)?;

        tracing::info!(customer_url, funding_source = %location, "Dwolla funding source created");
        Ok(location)
    }
}

/// Stand-in used when Dwolla credentials are absent
pub struct Unconfigured;

#[async_trait]
impl FundingSourceLinker for Unconfigured {
    async fn create_funding_source(
        &self,
        _customer_url: &str,
        _processor_token: &str,
        _name: &str,
    ) -> Result<String, DwollaError> {
        Err(DwollaError::NotConfigured)
    }
}

async fn rejected(response: reqwest::Response) -> DwollaError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    DwollaError::Rejected { status, body }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DwollaEnvironment;

    #[test]
    fn test_funding_source_body() {
        let body = serde_json::to_value(FundingSourceRequest {
            plaid_token: "processor-sandbox-123",
            name: "Checking",
        })
        .unwrap();
        assert_eq!(
            body,
            serde_json::json!({"plaidToken": "processor-sandbox-123", "name": "Checking"})
        );
    }

    #[tokio::test]
    async fn test_foreign_customer_url_is_refused_before_any_request() {
        let client = DwollaClient::new(DwollaConfig {
            app_key: "key".to_string(),
            app_secret: "secret".to_string(),
            environment: DwollaEnvironment::Sandbox,
        })
        .unwrap();

        let result = client
            .create_funding_source("https://attacker.example/steal", "processor-token", "Checking")
            .await;
        assert!(matches!(result, Err(DwollaError::ForeignCustomer(_))));
    }

    #[tokio::test]
    async fn test_unconfigured_fails() {
        let result = Unconfigured
            .create_funding_source("https://api-sandbox.dwolla.com/customers/x", "t", "n")
            .await;
        assert!(matches!(result, Err(DwollaError::NotConfigured)));
    }
}
