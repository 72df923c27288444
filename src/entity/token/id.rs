use chrono::{DateTime, Utc};
use sea_orm::*;
use serde::{Deserialize, Serialize};

/// Identity claims carried by the launch, as forwarded to callbacks.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub given_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub family_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// The validated ID token of the most recent launch for one
/// `(iss, deployment_id, user)`. Overwritten on re-launch.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "id_tokens")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub iss: String,
    #[sea_orm(primary_key, auto_increment = false)]
    pub deployment_id: String,
    #[sea_orm(primary_key, auto_increment = false)]
    pub user: String,

    // JSON columns, deserialized on demand through the accessors below
    pub roles: String,
    pub user_info: String,
    pub platform_info: String,
    pub lis: String,
    pub endpoint: String,
    pub names_roles: String,

    pub last_launch_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn roles(&self) -> Result<Vec<String>, serde_json::Error> {
        serde_json::from_str(&self.roles)
    }

    pub fn user_info(&self) -> Result<UserInfo, serde_json::Error> {
        serde_json::from_str(&self.user_info)
    }

    pub fn platform_info(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::from_str(&self.platform_info)
    }

    pub fn lis(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::from_str(&self.lis)
    }

    /// Assignment and grade service endpoint claim, if the platform sent one.
    pub fn endpoint(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::from_str(&self.endpoint)
    }

    /// Names and role provisioning service claim, if the platform sent one.
    pub fn names_roles(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::from_str(&self.names_roles)
    }
}
