//! Sink kinds and their metadata.

pub mod aws_credentials_file;

use serde::Serialize;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SinkMeta {
    pub code: String,
    pub name: String,
}

/// Which sink kinds exist and which providers can feed them.
#[derive(Clone, Debug)]
pub struct SinkRegistry {
    sinks: Vec<(SinkMeta, Vec<String>)>,
}

impl SinkRegistry {
    pub fn new() -> Self {
        Self { sinks: Vec::new() }
    }

    /// Registers a sink kind accepting payloads from `provider_codes`.
    pub fn register(mut self, meta: SinkMeta, provider_codes: &[&str]) -> Self {
        self.sinks.push((
            meta,
            provider_codes.iter().map(|c| c.to_string()).collect(),
        ));
        self
    }

    pub fn get(&self, code: &str) -> Option<&SinkMeta> {
        self.sinks
            .iter()
            .map(|(meta, _)| meta)
            .find(|meta| meta.code == code)
    }

    pub fn compatible_with(&self, provider_code: &str) -> Vec<SinkMeta> {
        self.sinks
            .iter()
            .filter(|(_, providers)| providers.iter().any(|p| p == provider_code))
            .map(|(meta, _)| meta.clone())
            .collect()
    }
}

impl Default for SinkRegistry {
    fn default() -> Self {
        Self::new().register(
            SinkMeta {
                code: aws_credentials_file::SINK_CODE.to_string(),
                name: aws_credentials_file::SINK_NAME.to_string(),
            },
            &[crate::providers::aws_idc::PROVIDER_CODE],
        )
    }
}
