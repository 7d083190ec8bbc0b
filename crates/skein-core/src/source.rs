//! The boundary between the dispatch core and the remote platform.
//!
//! The polling loop never talks to the network itself. It goes through an
//! [`UpdateSource`], which provides the three primitives the loop needs:
//! fetching a batch of updates, the one-shot identity call used during
//! initialization, and webhook teardown before polling starts.
//!
//! Cancellation is cooperative: callers race the returned future against a
//! cancellation token and drop it when the token fires, which aborts the
//! underlying request.

use async_trait::async_trait;
use serde::Serialize;

use crate::error::ApiResult;
use crate::update::{BotInfo, Update};

/// Parameters of a single fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GetUpdatesParams {
    /// Identifier of the first update to return; confirms everything before it.
    pub offset: i64,
    /// Maximum number of updates in the batch (1-100).
    pub limit: u32,
    /// Long-polling timeout in seconds; `0` returns immediately.
    pub timeout: u32,
    /// Update kinds to receive. `None` keeps whatever the remote last saw.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed_updates: Option<Vec<String>>,
}

/// A remote source of updates.
#[async_trait]
pub trait UpdateSource: Send + Sync + 'static {
    /// Fetches the next batch of updates.
    async fn get_updates(&self, params: &GetUpdatesParams) -> ApiResult<Vec<Update>>;

    /// Fetches the identity of the bot account.
    async fn get_me(&self) -> ApiResult<BotInfo>;

    /// Removes a configured webhook so that polling is allowed.
    async fn delete_webhook(&self, drop_pending_updates: bool) -> ApiResult<bool>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_omit_allowed_updates_when_unset() {
        let params = GetUpdatesParams {
            offset: 7,
            limit: 100,
            timeout: 30,
            allowed_updates: None,
        };
        let json = serde_json::to_value(&params).unwrap();
        assert_eq!(json["offset"], 7);
        assert!(json.get("allowed_updates").is_none());
    }

    #[test]
    fn test_params_serialize_allowed_updates() {
        let params = GetUpdatesParams {
            allowed_updates: Some(vec!["message".into()]),
            ..Default::default()
        };
        let json = serde_json::to_value(&params).unwrap();
        assert_eq!(json["allowed_updates"][0], "message");
    }
}
