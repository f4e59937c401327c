use serde::{Deserialize, Serialize};

/// Envelope returned by every metadata API call.
///
/// `data` is kept as a raw JSON value so callers decide the payload type,
/// the same way the service leaves it untyped on the wire.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ApiResponse {
    pub status: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl ApiResponse {
    /// Successful response without payload.
    pub fn ok() -> Self {
        Self {
            status: true,
            message: None,
            data: None,
        }
    }

    /// Successful response carrying `data`.
    pub fn with_data<T: Serialize>(data: &T) -> Result<Self, serde_json::Error> {
        Ok(Self {
            status: true,
            message: None,
            data: Some(serde_json::to_value(data)?),
        })
    }

    /// Failed response with a human-readable message.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: false,
            message: Some(message.into()),
            data: None,
        }
    }

    /// Deserializes `data` into the given type.
    pub fn parse_data<T: for<'de> Deserialize<'de>>(&self) -> Result<Option<T>, serde_json::Error> {
        match &self.data {
            Some(value) => Ok(Some(T::deserialize(value)?)),
            None => Ok(None),
        }
    }

    /// The server message, or a generic placeholder.
    pub fn message_or_default(&self) -> &str {
        self.message.as_deref().unwrap_or("request failed")
    }
}
