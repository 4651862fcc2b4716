use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Params of `notifications/progress`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressNotificationParams {
    /// Token the client supplied in `params._meta.progressToken`
    pub progress_token: Value,
    pub progress: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
}

impl ProgressNotificationParams {
    pub fn new(progress_token: Value, progress: u64, total: Option<u64>) -> Self {
        Self {
            progress_token,
            progress,
            total,
        }
    }

    /// Extract `_meta.progressToken` from raw request params
    pub fn token_from_params(params: &Value) -> Option<Value> {
        params
            .get("_meta")
            .and_then(|meta| meta.get("progressToken"))
            .filter(|token| token.is_string() || token.is_number())
            .cloned()
    }
}
