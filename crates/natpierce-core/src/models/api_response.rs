//! Uniform success/error envelope for caller-facing operations.

use serde::{Deserialize, Serialize};

/// Result of a caller-facing operation.
///
/// Failures travel as a human-readable message instead of an error value,
/// so nothing raised inside the supervisor crosses the boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(flatten, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            error: None,
            data: Some(data),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(message.into()),
            data: None,
        }
    }

    /// Successful response without data (for void operations).
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
            data: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.success
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn from_result<E: std::fmt::Display>(result: Result<T, E>) -> Self {
        match result {
            Ok(data) => Self::success(data),
            Err(e) => Self::error(e.to_string()),
        }
    }
}

impl<T> From<crate::Result<T>> for ApiResponse<T> {
    fn from(result: crate::Result<T>) -> Self {
        Self::from_result(result)
    }
}

/// Response for operations that only report success or failure.
pub type UnitResponse = ApiResponse<()>;

impl UnitResponse {
    /// Map a unit result, keeping `data` empty on success.
    pub fn from_unit(result: crate::Result<()>) -> Self {
        match result {
            Ok(()) => Self::ok(),
            Err(e) => Self::error(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NatpierceError;

    #[test]
    fn test_unit_error_serialization() {
        let response = UnitResponse::from_unit(Err(NatpierceError::NotRunning));
        let json = serde_json::to_string(&response).unwrap();
        assert_eq!(json, r#"{"success":false,"error":"No running core"}"#);
    }

    #[test]
    fn test_unit_success_serialization() {
        let json = serde_json::to_string(&UnitResponse::from_unit(Ok(()))).unwrap();
        assert_eq!(json, r#"{"success":true}"#);
    }

    #[test]
    fn test_from_result() {
        let response: ApiResponse<u16> = Ok(33272).into();
        assert!(response.is_success());
        assert_eq!(response.data, Some(33272));

        let response: ApiResponse<u16> = Err(NatpierceError::InvalidResource("x".into())).into();
        assert_eq!(response.error_message(), Some("Invalid resource: x"));
    }
}
