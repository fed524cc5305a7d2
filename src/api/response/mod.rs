use num_derive::FromPrimitive;
use serde::Deserialize;
use serde_json::Value;

/// Non-zero `code` values documented for the realtime info endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
pub enum FailCode {
    InterfaceUnauthorized = 1001,
    ParameterValidationFailed = 1002,
    DataUnauthorized = 1003,
    DuplicateData = 1004,
    RequestFailed = 2001,
    QueryFrequencyExceeded = 2002,
}

/* {"success":true,"exception":"Query success!","result":{...},"code":0} */
#[derive(Debug, Deserialize)]
pub struct GetRealtimeInfo {
    pub success: bool,
    #[serde(default)]
    pub exception: Option<String>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub code: Option<u64>,
}

impl GetRealtimeInfo {
    pub fn fail_code(&self) -> Option<FailCode> {
        self.code.and_then(num::FromPrimitive::from_u64)
    }
}
