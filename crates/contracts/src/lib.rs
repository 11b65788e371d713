use serde::{Deserialize, Serialize};

pub mod canonical;

pub const UNAUTHORIZED_MESSAGE: &str = "You must be authenticated to access this resource";

/// Authenticated caller as resolved from a bearer credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewUser {
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    BadInput,
    Unauthorized,
    NotFound,
    MethodNotSupported,
    FetchFailed,
    CreateFailed,
    Internal,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::BadInput => "BAD_INPUT",
            ErrorCode::Unauthorized => "UNAUTHORIZED",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::MethodNotSupported => "METHOD_NOT_SUPPORTED",
            ErrorCode::FetchFailed => "FETCH_FAILED",
            ErrorCode::CreateFailed => "CREATE_FAILED",
            ErrorCode::Internal => "INTERNAL",
        }
    }

    pub fn http_status(self) -> u16 {
        match self {
            ErrorCode::BadInput => 400,
            ErrorCode::Unauthorized => 401,
            ErrorCode::NotFound => 404,
            ErrorCode::MethodNotSupported => 405,
            ErrorCode::FetchFailed | ErrorCode::CreateFailed | ErrorCode::Internal => 500,
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: ErrorCode,
    pub message: String,
}

/// Per-call response as it appears on the wire:
/// `{"result":{"data":..}}` or `{"error":{"code":..,"message":..}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseEnvelope {
    Result {
        #[serde(default)]
        data: serde_json::Value,
    },
    Error(ErrorBody),
}

impl ResponseEnvelope {
    pub fn data(data: serde_json::Value) -> Self {
        ResponseEnvelope::Result { data }
    }

    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        ResponseEnvelope::Error(ErrorBody {
            code,
            message: message.into(),
        })
    }

    pub fn is_error(&self) -> bool {
        matches!(self, ResponseEnvelope::Error(_))
    }

    pub fn into_result(self) -> Result<serde_json::Value, ErrorBody> {
        match self {
            ResponseEnvelope::Result { data } => Ok(data),
            ResponseEnvelope::Error(body) => Err(body),
        }
    }
}

/// Per-call request body: `{"input": <value>}`. Any other key is rejected.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RequestEnvelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcedureKind {
    Query,
    Mutation,
}

impl ProcedureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ProcedureKind::Query => "query",
            ProcedureKind::Mutation => "mutation",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelopes_match_wire_shape() {
        let ok = ResponseEnvelope::data(serde_json::json!({"greeting": "Hello world!"}));
        assert_eq!(
            serde_json::to_value(&ok).unwrap(),
            serde_json::json!({"result": {"data": {"greeting": "Hello world!"}}})
        );

        let err = ResponseEnvelope::error(ErrorCode::Unauthorized, UNAUTHORIZED_MESSAGE);
        assert_eq!(
            serde_json::to_value(&err).unwrap(),
            serde_json::json!({
                "error": {
                    "code": "UNAUTHORIZED",
                    "message": "You must be authenticated to access this resource"
                }
            })
        );
    }

    #[test]
    fn result_envelope_without_data_decodes_as_null() {
        let decoded: ResponseEnvelope =
            serde_json::from_value(serde_json::json!({"result": {}})).unwrap();
        assert_eq!(decoded.into_result().unwrap(), serde_json::Value::Null);
    }

    #[test]
    fn request_envelope_rejects_unwrapped_input() {
        let wrapped: RequestEnvelope =
            serde_json::from_str(r#"{"input":{"name":"Ada"}}"#).unwrap();
        assert_eq!(wrapped.input, Some(serde_json::json!({"name": "Ada"})));

        let empty: RequestEnvelope = serde_json::from_str("{}").unwrap();
        assert_eq!(empty.input, None);

        assert!(serde_json::from_str::<RequestEnvelope>(r#"{"name":"Ada"}"#).is_err());
    }

    #[test]
    fn identity_serializes_missing_email_as_null() {
        let identity = Identity {
            id: "u1".to_string(),
            email: None,
            metadata: serde_json::Map::new(),
        };
        assert_eq!(
            serde_json::to_value(&identity).unwrap(),
            serde_json::json!({"id": "u1", "email": null, "metadata": {}})
        );
    }

    #[test]
    fn error_code_strings_match_serde_names() {
        for code in [
            ErrorCode::BadInput,
            ErrorCode::Unauthorized,
            ErrorCode::NotFound,
            ErrorCode::MethodNotSupported,
            ErrorCode::FetchFailed,
            ErrorCode::CreateFailed,
            ErrorCode::Internal,
        ] {
            assert_eq!(
                serde_json::to_value(code).unwrap(),
                serde_json::Value::String(code.as_str().to_string())
            );
        }
    }
}
