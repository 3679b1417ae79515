use std::sync::Arc;

use tracing::{info, instrument};

use crate::config::{Config, ProviderConfig};
use crate::database::Database;
use crate::provider::rekognition::RekognitionProvider;
use crate::provider::self_hosted::SelfHostedProvider;
use crate::provider::FaceProvider;
use crate::rate_limiter::RateLimiter;
use crate::storage::Storage;

pub struct App {
    pub database: Arc<Database>,
    pub storage: Arc<Storage>,
    pub provider: Arc<dyn FaceProvider>,
    pub rate_limiter: Arc<RateLimiter>,
    pub config: Config,
}

impl App {
    /// Connect to the database and object store and construct the
    /// face-provider adapter selected by the configuration.
    #[instrument(name = "App::new", level = "debug", skip_all)]
    pub async fn new(config: Config) -> anyhow::Result<Arc<Self>> {
        let database = Arc::new(Database::new(&config.database).await?);
        let storage = Arc::new(Storage::new(&config.storage)?);

        let provider: Arc<dyn FaceProvider> = match &config.provider {
            ProviderConfig::Rekognition => {
                info!("Using the Rekognition face provider");
                Arc::new(RekognitionProvider::new(&config.indexing).await)
            }
            ProviderConfig::SelfHosted(self_hosted) => {
                info!(url = %self_hosted.url, "Using a self-hosted face provider");
                Arc::new(SelfHostedProvider::new(self_hosted, &config.indexing)?)
            }
        };

        let rate_limiter = Arc::new(RateLimiter::new(
            config.indexing.tps,
            config.indexing.safety_factor,
        ));

        Ok(Arc::new(Self {
            database,
            storage,
            provider,
            rate_limiter,
            config,
        }))
    }
}
