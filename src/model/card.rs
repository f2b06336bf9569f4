use serde::{Deserialize, Serialize};

/// A record on the target board (a Trello card).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Card {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Remote issue id stored in a dedicated field, for boards that support one.
    /// When present it wins over the `#<id>` naming convention.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
}
