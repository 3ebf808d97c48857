//! Request extractors
//!
//! Actions accept any method: `GET` arguments come from the query string,
//! everything else from a JSON body. Arguments are validated in one pass so
//! the caller sees every violation at once.

use axum::async_trait;
use axum::body::Bytes;
use axum::extract::{FromRequest, FromRequestParts, Query, Request};
use axum::http::request::Parts;
use axum::http::Method;
use serde::de::DeserializeOwned;
use validator::{Validate, ValidationErrors};

use crate::domain::AuthContext;
use crate::error::AppError;

/// Validated action arguments
#[derive(Debug, Clone)]
pub struct Args<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for Args<T>
where
    T: DeserializeOwned + Validate,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let value: T = if req.method() == Method::GET {
            Query::<T>::try_from_uri(req.uri())
                .map_err(|e| AppError::Validation(vec![e.body_text()]))?
                .0
        } else {
            let bytes = Bytes::from_request(req, state)
                .await
                .map_err(|e| AppError::Validation(vec![e.body_text()]))?;
            let body: &[u8] = if bytes.is_empty() { b"{}" } else { &bytes };
            serde_json::from_slice(body).map_err(|e| AppError::Validation(vec![e.to_string()]))?
        };

        validate(&value)?;
        Ok(Args(value))
    }
}

/// Run the declared schema and collect every violation
pub fn validate<T: Validate>(value: &T) -> Result<(), AppError> {
    value
        .validate()
        .map_err(|errors| AppError::Validation(violations(&errors)))
}

fn violations(errors: &ValidationErrors) -> Vec<String> {
    let mut messages: Vec<String> = errors
        .field_errors()
        .into_iter()
        .flat_map(|(field, errors)| {
            errors.iter().map(move |error| match &error.message {
                Some(message) => format!("{}: {}", field, message),
                None => format!("{}: {}", field, error.code),
            })
        })
        .collect();
    messages.sort();
    messages
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthContext>()
            .cloned()
            .ok_or_else(|| AppError::Unauthorized("missing bearer token".to_string()))
    }
}
