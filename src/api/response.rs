//! Success envelope

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::ser::{Serialize, SerializeMap, Serializer};

/// `{status: 200, success: true, <key>: <data>}`
#[derive(Debug)]
pub struct Success<T> {
    key: &'static str,
    data: T,
}

impl<T: Serialize> Success<T> {
    pub fn new(key: &'static str, data: T) -> Self {
        Self { key, data }
    }
}

impl<T: Serialize> Serialize for Success<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(3))?;
        map.serialize_entry("status", &StatusCode::OK.as_u16())?;
        map.serialize_entry("success", &true)?;
        map.serialize_entry(self.key, &self.data)?;
        map.end()
    }
}

impl<T: Serialize> IntoResponse for Success<T> {
    fn into_response(self) -> Response {
        (StatusCode::OK, Json(self)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_envelope_shape() {
        let body = serde_json::to_value(Success::new("lenders", vec!["a", "b"])).unwrap();
        assert_eq!(
            body,
            json!({"status": 200, "success": true, "lenders": ["a", "b"]})
        );
    }
}
