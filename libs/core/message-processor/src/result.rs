use crate::error::HandlerError;
use serde_json::Value;

/// Result of a handler invocation.
///
/// A failed result may carry the fault that caused it; a successful one never does.
/// `status_code` is informational (HTTP-style) and does not influence routing.
#[derive(Debug)]
pub struct OperationResult {
    success: bool,
    message: String,
    status_code: u16,
    cause: Option<HandlerError>,
    data: Option<Value>,
}

impl OperationResult {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            status_code: 200,
            cause: None,
            data: None,
        }
    }

    /// Expected business rejection: no fault attached.
    pub fn rejected(message: impl Into<String>, status_code: u16) -> Self {
        Self {
            success: false,
            message: message.into(),
            status_code,
            cause: None,
            data: None,
        }
    }

    /// Failure caused by an infrastructure fault. Classified by the fault.
    pub fn failure(message: impl Into<String>, cause: HandlerError) -> Self {
        Self {
            success: false,
            message: message.into(),
            status_code: 500,
            cause: Some(cause),
            data: None,
        }
    }

    pub fn with_status_code(mut self, status_code: u16) -> Self {
        self.status_code = status_code;
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn is_success(&self) -> bool {
        self.success
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn status_code(&self) -> u16 {
        self.status_code
    }

    pub fn cause(&self) -> Option<&HandlerError> {
        self.cause.as_ref()
    }

    pub fn data(&self) -> Option<&Value> {
        self.data.as_ref()
    }
}
