//! HTTP error mapping.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

/// Error returned by route handlers; renders as `{"error": message}`.
#[derive(Debug)]
pub enum ApiError {
    Internal(pvw_core::Error),
    NotFound(String),
    BadRequest(String),
    Conflict(String),
}

impl From<pvw_core::Error> for ApiError {
    fn from(err: pvw_core::Error) -> Self {
        use pvw_core::Error;
        match err {
            Error::NotFound(msg) => ApiError::NotFound(msg),
            Error::FileNotFound(id) => ApiError::NotFound(format!("File {} not found", id)),
            Error::JobNotFound(id) => ApiError::NotFound(format!("Job {} not found", id)),
            Error::InvalidInput(msg) => ApiError::BadRequest(msg),
            Error::Conflict(msg) => ApiError::Conflict(msg),
            other => ApiError::Internal(other),
        }
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match self {
            ApiError::Internal(err) => {
                tracing::error!(subsystem = "api", error = %err, "Request failed");
                err.to_string()
            }
            ApiError::NotFound(msg) | ApiError::BadRequest(msg) | ApiError::Conflict(msg) => msg,
        };

        let body = Json(serde_json::json!({
            "error": message,
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_error_status_mapping() {
        use pvw_core::Error;

        let cases = [
            (Error::NotFound("Scan x not found".into()), StatusCode::NOT_FOUND),
            (Error::FileNotFound(Uuid::nil()), StatusCode::NOT_FOUND),
            (Error::JobNotFound(Uuid::nil()), StatusCode::NOT_FOUND),
            (Error::InvalidInput("bad".into()), StatusCode::BAD_REQUEST),
            (Error::Conflict("busy".into()), StatusCode::CONFLICT),
            (Error::Internal("boom".into()), StatusCode::INTERNAL_SERVER_ERROR),
            (Error::Catalog("down".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, expected) in cases {
            assert_eq!(ApiError::from(err).status(), expected);
        }
    }

    #[tokio::test]
    async fn test_error_body() {
        let response = ApiError::from(pvw_core::Error::JobNotFound(Uuid::nil())).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(
            body["error"],
            "Job 00000000-0000-0000-0000-000000000000 not found"
        );
    }
}
