//! Credential providers and their metadata.

pub mod aws_idc;

use serde::Serialize;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderMeta {
    pub code: String,
    pub name: String,
}

/// Supported providers, injected where needed.
#[derive(Clone, Debug)]
pub struct ProviderRegistry {
    providers: Vec<ProviderMeta>,
}

impl ProviderRegistry {
    pub fn new(providers: Vec<ProviderMeta>) -> Self {
        Self { providers }
    }

    pub fn list(&self) -> &[ProviderMeta] {
        &self.providers
    }

    pub fn get(&self, code: &str) -> Option<&ProviderMeta> {
        self.providers.iter().find(|p| p.code == code)
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new(vec![ProviderMeta {
            code: aws_idc::PROVIDER_CODE.to_string(),
            name: aws_idc::PROVIDER_NAME.to_string(),
        }])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_registry() {
        let registry = ProviderRegistry::default();
        assert_eq!(registry.list().len(), 1);
        let meta = registry.get("aws-idc").unwrap();
        assert_eq!(meta.name, "AWS Identity Center");
        assert!(registry.get("nope").is_none());
    }
}
