use serde::{Deserialize, Serialize};

/// Numeric result codes reported by the `/send` endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseCode {
    Ok,
    NoAccessToken,
    NoContent,
    InvalidAccessToken,
    SendMessageFailed,
}

impl ResponseCode {
    pub fn as_u8(self) -> u8 {
        match self {
            ResponseCode::Ok => 0,
            ResponseCode::NoAccessToken => 1,
            ResponseCode::NoContent => 2,
            ResponseCode::InvalidAccessToken => 3,
            ResponseCode::SendMessageFailed => 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayResponse {
    pub code: u8,
    pub message: String,
}

impl RelayResponse {
    pub fn new(code: ResponseCode, message: impl Into<String>) -> Self {
        Self {
            code: code.as_u8(),
            message: message.into(),
        }
    }

    pub fn ok() -> Self {
        Self::new(ResponseCode::Ok, "OK")
    }

    pub fn is_ok(&self) -> bool {
        self.code == ResponseCode::Ok.as_u8()
    }
}
