//! Read-only views for the landing page.

use crate::context::AppContext;
use crate::error::AppResult;
use crate::favorites::{Favorite, FavoritesRepo};
use crate::providers::{ProviderMeta, ProviderRegistry};
use crate::sinks::{SinkMeta, SinkRegistry};
use std::sync::Arc;

pub struct DashboardController {
    favorites: Arc<FavoritesRepo>,
    providers: ProviderRegistry,
    sinks: SinkRegistry,
}

impl DashboardController {
    pub fn new(
        favorites: Arc<FavoritesRepo>,
        providers: ProviderRegistry,
        sinks: SinkRegistry,
    ) -> Self {
        Self {
            favorites,
            providers,
            sinks,
        }
    }

    pub fn list_providers(&self) -> Vec<ProviderMeta> {
        self.providers.list().to_vec()
    }

    pub fn list_favorites(&self, ctx: &AppContext) -> AppResult<Vec<Favorite>> {
        self.favorites.list_all(ctx)
    }

    /// Sink kinds that accept payloads from `provider_code`.
    pub fn list_compatible_sinks(&self, provider_code: &str) -> Vec<SinkMeta> {
        self.sinks.compatible_with(provider_code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use tokio_util::sync::CancellationToken;

    fn controller() -> (DashboardController, Arc<FavoritesRepo>, AppContext) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let favorites = Arc::new(FavoritesRepo::new(db));
        let dashboard = DashboardController::new(
            favorites.clone(),
            ProviderRegistry::default(),
            SinkRegistry::default(),
        );
        let ctx = AppContext::for_request("root", "Dashboard", CancellationToken::new());
        (dashboard, favorites, ctx)
    }

    #[test]
    fn test_list_providers() {
        let (dashboard, _, _) = controller();
        let providers = dashboard.list_providers();
        assert_eq!(providers.len(), 1);
        assert_eq!(providers[0].code, "aws-idc");
        assert_eq!(providers[0].name, "AWS Identity Center");
    }

    #[test]
    fn test_list_favorites() {
        let (dashboard, favorites, ctx) = controller();
        assert!(dashboard.list_favorites(&ctx).unwrap().is_empty());

        favorites.add(&ctx, &Favorite::new("aws-idc", "abc")).unwrap();
        assert_eq!(
            dashboard.list_favorites(&ctx).unwrap(),
            vec![Favorite::new("aws-idc", "abc")]
        );
    }

    #[test]
    fn test_list_compatible_sinks() {
        let (dashboard, _, _) = controller();
        let sinks = dashboard.list_compatible_sinks("aws-idc");
        assert_eq!(sinks.len(), 1);
        assert_eq!(sinks[0].code, "aws-credentials-file");
        assert!(dashboard.list_compatible_sinks("unknown").is_empty());
    }
}
