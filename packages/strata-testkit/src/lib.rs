mod error;

pub use error::{Error, Result};

use std::{
	env, fs,
	path::{Path, PathBuf},
	sync::Mutex,
};

use time::{Duration, OffsetDateTime, macros::datetime};
use uuid::Uuid;

use strata_config::Config;
use strata_domain::Clock;

const SAMPLE_CONFIG: &str = include_str!("../../strata-config/tests/fixtures/sample_config.toml");

/// Scratch storage root under the system temp directory, removed on cleanup or drop.
pub struct TestStore {
	root: PathBuf,
	cleaned: bool,
}
impl TestStore {
	pub fn new() -> Result<Self> {
		let root = env::temp_dir().join(format!("strata_test_{}", Uuid::new_v4().simple()));

		fs::create_dir_all(&root)?;

		Ok(Self { root, cleaned: false })
	}

	pub fn root(&self) -> &Path {
		&self.root
	}

	/// The sample configuration with its storage root pointed at this scratch directory.
	pub fn config(&self) -> Result<Config> {
		let mut cfg: Config = toml::from_str(SAMPLE_CONFIG)?;

		cfg.storage.root = self.root.clone();

		strata_config::validate(&cfg)?;

		Ok(cfg)
	}

	pub fn cleanup(mut self) -> Result<()> {
		self.cleanup_inner()
	}

	fn cleanup_inner(&mut self) -> Result<()> {
		if self.cleaned {
			return Ok(());
		}

		match fs::remove_dir_all(&self.root) {
			Ok(()) => {},
			Err(err) if err.kind() == std::io::ErrorKind::NotFound => {},
			Err(err) =>
				return Err(Error::Message(format!(
					"Failed to remove test store {}: {err}.",
					self.root.display()
				))),
		}

		self.cleaned = true;

		Ok(())
	}
}
impl Drop for TestStore {
	fn drop(&mut self) {
		if let Err(err) = self.cleanup_inner() {
			eprintln!("{err}");
		}
	}
}

/// Clock that only moves when a test tells it to.
pub struct ManualClock {
	now: Mutex<OffsetDateTime>,
}
impl ManualClock {
	pub fn new(now: OffsetDateTime) -> Self {
		Self { now: Mutex::new(now) }
	}

	pub fn advance(&self, by: Duration) {
		let mut now = self.now.lock().unwrap_or_else(|err| err.into_inner());

		*now += by;
	}

	pub fn set(&self, to: OffsetDateTime) {
		*self.now.lock().unwrap_or_else(|err| err.into_inner()) = to;
	}
}
impl Default for ManualClock {
	fn default() -> Self {
		Self::new(datetime!(2026-01-01 00:00 UTC))
	}
}
impl Clock for ManualClock {
	fn now(&self) -> OffsetDateTime {
		*self.now.lock().unwrap_or_else(|err| err.into_inner())
	}
}
