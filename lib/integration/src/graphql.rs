//! GraphQL request and response shapes for the Monday.com API.

use lead_intake_conversation::TrackerError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

pub(crate) const CREATE_ITEM: &str = "mutation ($board: ID!, $group: String!, $name: String!) { \
     create_item (board_id: $board, group_id: $group, item_name: $name) { id } }";

pub(crate) const CREATE_UPDATE: &str =
    "mutation ($item: ID!, $body: String!) { create_update (item_id: $item, body: $body) { id } }";

#[derive(Debug, Serialize)]
pub(crate) struct Request {
    pub query: &'static str,
    pub variables: Value,
}

impl Request {
    pub(crate) fn create_item(board_id: u64, group_id: &str, name: &str) -> Self {
        Self {
            query: CREATE_ITEM,
            variables: json!({
                "board": board_id.to_string(),
                "group": group_id,
                "name": name,
            }),
        }
    }

    pub(crate) fn create_update(item_id: &str, body: &str) -> Self {
        Self {
            query: CREATE_UPDATE,
            variables: json!({ "item": item_id, "body": body }),
        }
    }
}

#[derive(Debug, Deserialize)]
struct Response<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<GraphqlError>,
    // Older API versions report failures this way instead of `errors`.
    #[serde(default)]
    error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GraphqlError {
    message: String,
}

/// `{ "id": "..." }` as returned by both mutations.
#[derive(Debug, Deserialize)]
pub(crate) struct Created {
    pub id: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CreateItemData {
    pub create_item: Created,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CreateUpdateData {
    pub create_update: Created,
}

/// Turns an HTTP status and body into mutation data or a tracker error.
pub(crate) fn parse_response<T: DeserializeOwned>(
    status: u16,
    body: &[u8],
) -> Result<T, TrackerError> {
    match status {
        401 | 403 => return Err(TrackerError::Unauthorized),
        429 => {
            return Err(TrackerError::Rejected {
                reason: "rate limited".to_string(),
            });
        }
        200..=299 => {}
        _ => {
            return Err(TrackerError::RequestFailed {
                reason: format!("HTTP {status}: {}", String::from_utf8_lossy(body)),
            });
        }
    }

    let response: Response<T> =
        serde_json::from_slice(body).map_err(|e| TrackerError::InvalidResponse {
            reason: e.to_string(),
        })?;

    if !response.errors.is_empty() {
        let reason = response
            .errors
            .into_iter()
            .map(|e| e.message)
            .collect::<Vec<_>>()
            .join("; ");
        return Err(TrackerError::Rejected { reason });
    }
    if let Some(reason) = response.error_message {
        return Err(TrackerError::Rejected { reason });
    }

    response.data.ok_or_else(|| TrackerError::InvalidResponse {
        reason: "response carried neither data nor errors".to_string(),
    })
}
