use crate::eventing::DomainEvent;
use crate::plumbing::SinkInstance;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupInput {
    pub start_url: String,
    pub aws_region: String,
    pub label: String,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizeSetupInput {
    pub client_id: String,
    pub start_url: String,
    pub aws_region: String,
    pub label: String,
    pub user_code: String,
    pub device_code: String,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizeRefreshInput {
    pub instance_id: String,
    pub region: String,
    pub user_code: String,
    pub device_code: String,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleInput {
    pub instance_id: String,
    pub account_id: String,
    pub role_name: String,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveRoleCredentialsInput {
    pub instance_id: String,
    pub account_id: String,
    pub role_name: String,
    pub aws_profile: String,
}

/// Role credentials to be flowed into a connected sink.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowCredentialsInput {
    pub sink_code: String,
    pub sink_id: String,
    pub instance_id: String,
    pub account_id: String,
    pub role_name: String,
}

/// What the UI needs to walk the user through device authorization.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizeDeviceFlowResult {
    /// Set when refreshing an existing instance.
    pub instance_id: Option<String>,
    pub start_url: String,
    pub region: String,
    pub label: String,
    pub client_id: String,
    pub verification_uri: String,
    pub user_code: String,
    pub expires_in: i32,
    pub device_code: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountRole {
    pub role_name: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub account_id: String,
    pub account_name: String,
    pub roles: Vec<AccountRole>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceCard {
    pub instance_id: String,
    pub enabled: bool,
    pub label: String,
    pub is_favorite: bool,
    pub is_access_token_expired: bool,
    pub access_token_expires_in: String,
    pub accounts: Vec<Account>,
    pub sinks: Vec<SinkInstance>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AwsIdcInstanceCreated {
    pub instance_id: String,
    pub start_url: String,
    pub region: String,
    pub label: String,
}

impl DomainEvent for AwsIdcInstanceCreated {
    const EVENT_TYPE: &'static str = "AwsIdcInstanceCreated";
}
