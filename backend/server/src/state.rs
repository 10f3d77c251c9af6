use std::sync::Arc;

use tracing::info;

use super::{
    cache::{ConfigCache, ConfigSource, JsonFileSource, PageCover, WebsiteConfig},
    catalog::{ArticleCatalog, Catalog},
    config::Config,
    counter::CounterService,
    database::{RedisStore, init_redis},
    detail::DetailAggregator,
    error::AppError,
    history::{FileHistory, VisitorHistory},
    keys::{PAGE_COVER, WEBSITE_CONFIG},
    reconcile::Reconciler,
    store::KeyValueStore,
    visitor::VisitorService,
};

pub struct State {
    pub config: Config,
    pub counters: CounterService,
    pub details: DetailAggregator,
    pub visitors: VisitorService,
    pub website_config: ConfigCache<WebsiteConfig>,
    pub pages: ConfigCache<Vec<PageCover>>,
    pub reconciler: Arc<Reconciler>,
}

impl State {
    pub async fn new(config: Config) -> Result<Arc<Self>, AppError> {
        let redis_connection = init_redis(&config.redis_url).await?;
        info!("Connected to Redis");

        let store = Arc::new(RedisStore::new(redis_connection));
        let catalog = Arc::new(Catalog::load(&config.catalog_path).await?);
        let history = Arc::new(FileHistory::new(&config.history_path));
        let website_config: Arc<JsonFileSource<WebsiteConfig>> =
            Arc::new(JsonFileSource::new(&config.website_config_path));
        let pages: Arc<JsonFileSource<Vec<PageCover>>> =
            Arc::new(JsonFileSource::new(&config.pages_path));

        Ok(Self::assemble(
            config,
            store,
            catalog,
            history,
            website_config,
            pages,
        ))
    }

    /// Wire the services over already-built backends.
    pub fn assemble(
        config: Config,
        store: Arc<dyn KeyValueStore>,
        catalog: Arc<dyn ArticleCatalog>,
        history: Arc<dyn VisitorHistory>,
        website_config: Arc<dyn ConfigSource<WebsiteConfig>>,
        pages: Arc<dyn ConfigSource<Vec<PageCover>>>,
    ) -> Arc<Self> {
        let counters = CounterService::new(store.clone());

        Arc::new(Self {
            details: DetailAggregator::new(catalog.clone(), counters.clone(), config.detail),
            visitors: VisitorService::new(
                store.clone(),
                history.clone(),
                catalog,
                config.time_zone,
            ),
            website_config: ConfigCache::new(store.clone(), website_config, WEBSITE_CONFIG),
            pages: ConfigCache::new(store.clone(), pages, PAGE_COVER),
            reconciler: Arc::new(Reconciler::new(store, history, config.time_zone)),
            counters,
            config,
        })
    }
}
