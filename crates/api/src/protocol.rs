//! Json rpc frames exchanged over the gateway websocket.
//!
//! - request: `{"id": "..", "method": "..", "params": [..]}`
//! - notification: `{"method": "..", "params": [..]}`
//! - response: `{"id": "..", "result": ..}` or
//!   `{"id": "..", "error": {"code": .., "message": "..", "data": ..}}`

use crate::*;

/// An inbound call. Without an `id` it is a notification and
/// no response is sent.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RpcRequest {
    /// Correlation id echoed in the response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Method name.
    pub method: String,

    /// Positional parameters.
    #[serde(default)]
    pub params: Vec<serde_json::Value>,
}

/// A server to client message that expects no response.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RpcNotification {
    /// Notification name.
    pub method: String,

    /// Positional parameters.
    #[serde(default)]
    pub params: Vec<serde_json::Value>,
}

/// The structured error returned in a failed response.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RpcErrorObject {
    /// Numeric error code.
    pub code: i64,

    /// Human readable message.
    pub message: String,

    /// Extra diagnostics.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl From<&HrssError> for RpcErrorObject {
    fn from(err: &HrssError) -> Self {
        Self {
            code: err.rpc_code(),
            message: err.to_string(),
            data: None,
        }
    }
}

impl RpcErrorObject {
    /// The error sent for a method name that is not registered.
    pub fn method_not_found(request: serde_json::Value) -> Self {
        Self {
            code: RPC_ERROR_CODE_METHOD_NOT_FOUND,
            message: "Unrecognized method".into(),
            data: Some(serde_json::json!({ "request": request })),
        }
    }

    /// The error sent for a frame that is not a valid request.
    pub fn parse_error(message: impl std::fmt::Display) -> Self {
        Self {
            code: RPC_ERROR_CODE_PARSE,
            message: message.to_string(),
            data: None,
        }
    }

    /// Turn a received error object back into an [HrssError].
    pub fn into_error(self) -> HrssError {
        let ctx = self.message;
        match self.code {
            RPC_ERROR_CODE_NOT_FOUND => HrssError::not_found(ctx),
            RPC_ERROR_CODE_CONNECTION => HrssError::connection(ctx),
            RPC_ERROR_CODE_TIMEOUT => HrssError::timeout(ctx),
            RPC_ERROR_CODE_CONFIGURATION | RPC_ERROR_CODE_METHOD_NOT_FOUND => {
                HrssError::configuration(ctx)
            }
            RPC_ERROR_CODE_PARSE | RPC_ERROR_CODE_INVALID_PARAMS => {
                HrssError::protocol(ctx)
            }
            code => HrssError::other(format!("rpc error {code}: {ctx}")),
        }
    }
}

/// The outcome half of a response.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RpcOutcome {
    /// The call succeeded.
    Result(serde_json::Value),

    /// The call failed.
    Error(RpcErrorObject),
}

/// A response to a request.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RpcResponse {
    /// The id of the request. `null` if the request id could not be read.
    pub id: Option<String>,

    /// Result or error.
    #[serde(flatten)]
    pub outcome: RpcOutcome,
}

impl RpcResponse {
    /// A success response.
    pub fn ok(id: Option<String>, result: serde_json::Value) -> Self {
        Self {
            id,
            outcome: RpcOutcome::Result(result),
        }
    }

    /// An error response.
    pub fn err(id: Option<String>, error: RpcErrorObject) -> Self {
        Self {
            id,
            outcome: RpcOutcome::Error(error),
        }
    }

    /// Convert into a plain result.
    pub fn into_result(self) -> HrssResult<serde_json::Value> {
        match self.outcome {
            RpcOutcome::Result(r) => Ok(r),
            RpcOutcome::Error(e) => Err(e.into_error()),
        }
    }
}

/// Any message a client may receive.
#[derive(Debug, Clone, PartialEq)]
pub enum RpcServerFrame {
    /// A response to an earlier request.
    Response(RpcResponse),

    /// An unsolicited notification.
    Notification(RpcNotification),
}

impl RpcServerFrame {
    /// Decode a server frame from json text.
    pub fn decode(text: &str) -> HrssResult<Self> {
        let v: serde_json::Value = serde_json::from_str(text)
            .map_err(|e| HrssError::protocol(format!("bad frame: {e}")))?;
        let is_response = v.get("result").is_some() || v.get("error").is_some();
        if is_response {
            serde_json::from_value(v)
                .map(Self::Response)
                .map_err(|e| HrssError::protocol(format!("bad response: {e}")))
        } else {
            serde_json::from_value(v)
                .map(Self::Notification)
                .map_err(|e| {
                    HrssError::protocol(format!("bad notification: {e}"))
                })
        }
    }
}
