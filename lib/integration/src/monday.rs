//! [`TaskTracker`] backed by Monday.com.

use crate::config::MondayConfig;
use crate::graphql::{CreateItemData, CreateUpdateData, Request, parse_response};
use async_trait::async_trait;
use lead_intake_conversation::{BoardRoute, CommentRef, TaskRef, TaskTracker, TrackerError};
use serde::de::DeserializeOwned;
use tracing::{debug, instrument, warn};

/// Creates Monday items for leads and posts their form as an update.
#[derive(Debug, Clone)]
pub struct MondayTracker {
    client: reqwest::Client,
    config: MondayConfig,
}

impl MondayTracker {
    /// Builds the HTTP client.
    ///
    /// # Errors
    ///
    /// Returns an error if the TLS backend cannot be initialized.
    pub fn new(config: MondayConfig) -> Result<Self, TrackerError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| TrackerError::RequestFailed {
                reason: e.to_string(),
            })?;
        Ok(Self { client, config })
    }

    async fn execute<T: DeserializeOwned>(&self, request: &Request) -> Result<T, TrackerError> {
        let response = self
            .client
            .post(&self.config.api_url)
            .header("Authorization", &self.config.api_token)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                let reason = if e.is_timeout() {
                    format!("timed out after {}s", self.config.timeout_secs)
                } else {
                    e.to_string()
                };
                TrackerError::RequestFailed { reason }
            })?;

        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|e| TrackerError::RequestFailed {
                reason: e.to_string(),
            })?;

        parse_response(status, &body).inspect_err(|e| {
            warn!(status, error = %e, "monday request failed");
        })
    }
}

#[async_trait]
impl TaskTracker for MondayTracker {
    #[instrument(skip_all, fields(board_id = route.board_id, group_id = %route.group_id))]
    async fn create_task(&self, name: &str, route: &BoardRoute) -> Result<TaskRef, TrackerError> {
        let data: CreateItemData = self
            .execute(&Request::create_item(route.board_id, &route.group_id, name))
            .await?;
        debug!(item_id = %data.create_item.id, "monday item created");
        Ok(TaskRef(data.create_item.id))
    }

    #[instrument(skip_all, fields(item_id = %task))]
    async fn add_comment(&self, task: &TaskRef, text: &str) -> Result<CommentRef, TrackerError> {
        let data: CreateUpdateData = self
            .execute(&Request::create_update(&task.0, text))
            .await?;
        debug!(update_id = %data.create_update.id, "monday update created");
        Ok(CommentRef(data.create_update.id))
    }
}
