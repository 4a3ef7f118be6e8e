pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error(transparent)]
	Storage(#[from] strata_storage::Error),
	#[error(transparent)]
	Service(#[from] strata_service::Error),
}
