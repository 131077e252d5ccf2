//! Inbound command and outbound response envelopes.
//!
//! ```json
//! // client -> gateway
//! {"code": 10003, "data": {"lang": "zh"}}
//!
//! // gateway -> client
//! {"code": 10003, "data": {"success": true, "errorCode": 0, "errorMsg": "",
//!                          "successMsg": "...", "result": null}}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{DomainError, Params};
use crate::error_code;

/// A command sent by a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandEnvelope {
    /// Numeric command code.
    pub code: u32,
    /// Command payload; its shape depends on the code.
    #[serde(default)]
    pub data: Value,
}

impl CommandEnvelope {
    /// Creates a new command envelope.
    pub fn new(code: impl Into<u32>, data: Value) -> Self {
        Self {
            code: code.into(),
            data,
        }
    }
}

/// A message sent to a client, either in reply to a command or pushed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    /// The command or push code this message answers to.
    pub code: u32,
    /// Structured outcome.
    pub data: WsResult,
}

impl ResponseEnvelope {
    /// Creates a new response envelope.
    pub fn new(code: impl Into<u32>, data: WsResult) -> Self {
        Self {
            code: code.into(),
            data,
        }
    }

    /// Creates a successful response carrying `result`.
    pub fn ok(code: impl Into<u32>, result: Value) -> Self {
        Self::new(code, WsResult::ok(result))
    }

    /// Creates a failed response from a domain error.
    pub fn error(code: impl Into<u32>, err: DomainError) -> Self {
        Self::new(code, WsResult::from_error(err))
    }
}

/// Outcome of a command.
///
/// `error_code == 0` holds exactly when `success` is true. The constructors
/// maintain that pairing and deserialization rejects payloads that break it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "RawWsResult")]
pub struct WsResult {
    success: bool,
    error_code: u32,
    error_msg: String,
    success_msg: String,
    result: Value,
    #[serde(skip)]
    error_params: Params,
}

/// Wire shape of [`WsResult`] before the pairing is checked.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawWsResult {
    success: bool,
    error_code: u32,
    #[serde(default)]
    error_msg: String,
    #[serde(default)]
    success_msg: String,
    #[serde(default)]
    result: Value,
}

impl TryFrom<RawWsResult> for WsResult {
    type Error = String;

    fn try_from(raw: RawWsResult) -> Result<Self, Self::Error> {
        if raw.success != (raw.error_code == error_code::SUCCESS) {
            return Err(format!(
                "success={} does not match errorCode={}",
                raw.success, raw.error_code
            ));
        }
        Ok(Self {
            success: raw.success,
            error_code: raw.error_code,
            error_msg: raw.error_msg,
            success_msg: raw.success_msg,
            result: raw.result,
            error_params: Params::new(),
        })
    }
}

impl WsResult {
    /// A successful outcome.
    pub fn ok(result: Value) -> Self {
        Self {
            success: true,
            error_code: error_code::SUCCESS,
            error_msg: String::new(),
            success_msg: String::new(),
            result,
            error_params: Params::new(),
        }
    }

    /// A successful outcome with a human-readable message.
    pub fn ok_with_message(message: impl Into<String>, result: Value) -> Self {
        Self {
            success_msg: message.into(),
            ..Self::ok(result)
        }
    }

    /// A failed outcome. A zero code is reported as a system error.
    pub fn fail(code: u32) -> Self {
        Self::fail_with_params(code, Params::new())
    }

    /// A failed outcome whose localized message takes template parameters.
    pub fn fail_with_params(code: u32, params: Params) -> Self {
        let code = if code == error_code::SUCCESS {
            error_code::SYSTEM_ERROR
        } else {
            code
        };
        Self {
            success: false,
            error_code: code,
            error_msg: String::new(),
            success_msg: String::new(),
            result: Value::Null,
            error_params: params,
        }
    }

    /// A failed outcome built from a domain error.
    pub fn from_error(err: DomainError) -> Self {
        Self::fail_with_params(err.code, err.params)
    }

    /// Whether the command succeeded.
    pub fn success(&self) -> bool {
        self.success
    }

    /// Numeric error code, zero on success.
    pub fn error_code(&self) -> u32 {
        self.error_code
    }

    /// Localized error message.
    pub fn error_msg(&self) -> &str {
        &self.error_msg
    }

    /// Localized success message.
    pub fn success_msg(&self) -> &str {
        &self.success_msg
    }

    /// Result payload.
    pub fn result(&self) -> &Value {
        &self.result
    }

    /// Template parameters for the error message.
    pub fn error_params(&self) -> &Params {
        &self.error_params
    }

    /// Sets the localized error message.
    pub fn set_error_msg(&mut self, message: impl Into<String>) {
        self.error_msg = message.into();
    }
}
