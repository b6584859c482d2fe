//! Binding between provider instances and the sinks fed from them.
//!
//! A sink kind registers a [`Plumber`] with every provider whose payload it
//! accepts. Providers never hold references to sink instances; they ask the
//! plumbers which sinks are connected to a given `(provider_code,
//! provider_id)` and hand payloads over by sink id.

use crate::context::AppContext;
use crate::error::AppResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SinkInstance {
    pub sink_code: String,
    pub sink_id: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisconnectSinkInput {
    pub sink_code: String,
    pub sink_id: String,
}

/// Payload flowed from the AWS Identity Center provider.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AwsCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

/// Owner of one sink kind, accepting payloads of type `T`.
#[async_trait]
pub trait Plumber<T: Send + Sync>: Send + Sync {
    fn sink_code(&self) -> &str;

    async fn list_connected_sinks(
        &self,
        ctx: &AppContext,
        provider_code: &str,
        provider_id: &str,
    ) -> AppResult<Vec<SinkInstance>>;

    async fn disconnect_sink(&self, ctx: &AppContext, input: DisconnectSinkInput)
        -> AppResult<()>;

    /// Delivers `data` into the sink instance `sink_id`.
    async fn flow_data(&self, ctx: &AppContext, data: &T, sink_id: &str) -> AppResult<()>;
}
