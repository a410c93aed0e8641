/// Errors produced by the Tower Shed middleware stack.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ShedError {
    /// The shedder rejected the request before any work was done.
    ///
    /// When the `axum` feature is enabled, this converts to `503 Service Unavailable`.
    #[error("Service is overloaded; request shed")]
    Overloaded,

    /// The request was admitted but did not complete in time.
    ///
    /// When the `axum` feature is enabled, this converts to `408 Request Timeout`.
    #[error("Request timed out")]
    Timeout,

    /// An unexpected error occurred in the inner service.
    ///
    /// The string contains the `Display` representation of the inner error.
    /// When the `axum` feature is enabled, this converts to `500 Internal Server Error`.
    #[error("Internal service error: {0}")]
    Inner(String),
}

impl From<shed_limit::ServiceOverloaded> for ShedError {
    fn from(_: shed_limit::ServiceOverloaded) -> Self {
        Self::Overloaded
    }
}

#[cfg(feature = "axum")]
impl axum::response::IntoResponse for ShedError {
    fn into_response(self) -> axum::response::Response {
        use axum::http::StatusCode;

        let status = match self {
            Self::Overloaded => StatusCode::SERVICE_UNAVAILABLE,
            Self::Timeout => StatusCode::REQUEST_TIMEOUT,
            Self::Inner(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        (status, self.to_string()).into_response()
    }
}
