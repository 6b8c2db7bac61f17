//! Response type written back to the caller.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Error,
}

/// The single JSON object written back on every connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
}

impl Response {
    pub fn success() -> Self {
        Self {
            status: Status::Success,
            message: None,
            stdout: None,
            stderr: None,
        }
    }

    pub fn success_with(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::success()
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: Status::Error,
            message: Some(message.into()),
            stdout: None,
            stderr: None,
        }
    }

    /// Attach captured process output.
    pub fn with_output(mut self, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        self.stdout = Some(stdout.into());
        self.stderr = Some(stderr.into());
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == Status::Success
    }

    /// Serialize for the wire. Falls back to a fixed error body so the
    /// caller always receives valid JSON.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            r#"{"status":"error","message":"serialization failed"}"#.to_string()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    #[test]
    fn error_omits_empty_fields() {
        let value: Value = serde_json::from_str(&Response::error("Invalid JSON").to_json()).unwrap();
        assert_eq!(value, json!({ "status": "error", "message": "Invalid JSON" }));
    }

    #[test]
    fn success_with_output() {
        let resp = Response::success().with_output("up", "");
        let value: Value = serde_json::from_str(&resp.to_json()).unwrap();
        assert_eq!(value, json!({ "status": "success", "stdout": "up", "stderr": "" }));
        assert!(resp.is_success());
    }

    #[test]
    fn parses_minimal_body() {
        let resp: Response = serde_json::from_str(r#"{"status":"success"}"#).unwrap();
        assert_eq!(resp, Response::success());
    }
}
