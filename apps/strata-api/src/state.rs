use std::sync::Arc;

use strata_service::StrataService;
use strata_storage::store::Store;

#[derive(Clone)]
pub struct AppState {
	pub service: Arc<StrataService>,
}
impl AppState {
	pub async fn new(config: strata_config::Config) -> color_eyre::Result<Self> {
		let store = Store::open(&config.storage).await?;
		let service = StrataService::new(config, store);

		Ok(Self::from_service(Arc::new(service)))
	}

	pub fn from_service(service: Arc<StrataService>) -> Self {
		Self { service }
	}
}
