use chrono::{DateTime, Utc};
use sea_orm::*;
use serde::{Deserialize, Serialize};

/// Context and resource state of the most recent launch into one
/// `(context_id, user)`.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "context_tokens")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub context_id: String,
    #[sea_orm(primary_key, auto_increment = false)]
    pub user: String,

    /// In-tool path the launch (or a later redirect) resolved to.
    pub path: String,
    pub target_link_uri: String,
    pub message_type: String,
    pub version: String,

    // JSON columns
    pub context: String,
    pub resource: String,
    pub custom: String,
    pub launch_presentation: String,
    pub deep_linking_settings: String,

    pub last_launch_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn context(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::from_str(&self.context)
    }

    pub fn resource(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::from_str(&self.resource)
    }

    pub fn custom(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::from_str(&self.custom)
    }

    pub fn launch_presentation(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::from_str(&self.launch_presentation)
    }

    pub fn deep_linking_settings(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::from_str(&self.deep_linking_settings)
    }

    pub fn is_deep_linking(&self) -> bool {
        self.message_type == "LtiDeepLinkingRequest"
    }
}
