use time::OffsetDateTime;

/// Source of "now" for every time-dependent rule.
pub trait Clock
where
	Self: Send + Sync,
{
	fn now(&self) -> OffsetDateTime;
}

pub struct SystemClock;
impl Clock for SystemClock {
	fn now(&self) -> OffsetDateTime {
		OffsetDateTime::now_utc()
	}
}
