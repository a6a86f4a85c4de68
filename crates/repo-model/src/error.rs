//! Structured errors surfaced by a platform client.

/// Result type for platform calls
pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// How the reconciler should react to an [`ApiError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Rate limiting, timeouts, 5xx. Retry with backoff.
    Transient,
    /// "Already exists" style responses. Re-fetch and convert the operation.
    Conflict,
    /// The target does not exist.
    NotFound,
    /// Authorization failures and other rejections. Do not retry.
    Fatal,
}

/// Error returned by a platform call: an HTTP-equivalent status plus the
/// platform's own error code.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("API error {status}: {message}")]
pub struct ApiError {
    pub status: u16,
    pub code: Option<String>,
    pub message: String,
}

impl ApiError {
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            code: None,
            message: message.into(),
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(404, message)
    }

    pub fn already_exists(message: impl Into<String>) -> Self {
        Self::new(422, message).with_code("already_exists")
    }

    pub fn rate_limited() -> Self {
        Self::new(429, "rate limit exceeded").with_code("rate_limited")
    }

    /// A request whose server-side outcome is unknown.
    pub fn timeout() -> Self {
        Self::new(504, "request timed out").with_code("timeout")
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(403, message)
    }

    pub fn class(&self) -> ErrorClass {
        let code = self.code.as_deref();
        match self.status {
            408 | 429 | 500..=599 => ErrorClass::Transient,
            403 if matches!(code, Some("rate_limited" | "secondary_rate_limit")) => ErrorClass::Transient,
            409 => ErrorClass::Conflict,
            422 if code == Some("already_exists") => ErrorClass::Conflict,
            404 => ErrorClass::NotFound,
            _ => ErrorClass::Fatal,
        }
    }

    /// Whether the call may have taken effect despite failing.
    pub fn is_ambiguous(&self) -> bool {
        matches!(self.status, 408 | 502 | 504)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(ApiError::rate_limited(), ErrorClass::Transient)]
    #[case(ApiError::timeout(), ErrorClass::Transient)]
    #[case(ApiError::new(502, "bad gateway"), ErrorClass::Transient)]
    #[case(ApiError::forbidden("secondary").with_code("secondary_rate_limit"), ErrorClass::Transient)]
    #[case(ApiError::already_exists("name already exists"), ErrorClass::Conflict)]
    #[case(ApiError::new(409, "conflict"), ErrorClass::Conflict)]
    #[case(ApiError::not_found("missing"), ErrorClass::NotFound)]
    #[case(ApiError::forbidden("resource not accessible by integration"), ErrorClass::Fatal)]
    #[case(ApiError::new(422, "validation failed"), ErrorClass::Fatal)]
    fn classifies_status_and_code(#[case] error: ApiError, #[case] class: ErrorClass) {
        assert_eq!(error.class(), class);
    }

    #[test]
    fn display_includes_status() {
        let error = ApiError::not_found("environment not found");
        assert_eq!(error.to_string(), "API error 404: environment not found");
    }
}
