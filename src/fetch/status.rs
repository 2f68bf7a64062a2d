//! Download status taxonomy and retry strategy.
//!
//! The transport layer boils every outcome down to one of these coarse
//! statuses, and the retry loop decides what to do from a pure mapping
//! of status to strategy.  Sleeping and counting live in the caller.

use strum::Display;


/// What happened to a single transfer attempt.
#[derive(Debug, Display, Copy, Clone, PartialEq, Eq)]
pub(crate) enum Status
{
	/// Got the whole thing.
	Completed,

	/// Server handed us a partial body (206) we didn't ask for.
	PartialFile,

	/// 404.
	NotFound,

	/// 403.
	Forbidden,

	/// Connect or transfer timed out.
	Timeout,

	/// Couldn't write the sink (disk full, memory cap blown, ...).
	WriteError,

	/// Server can't do ranges (416 or equivalent); resume is hopeless.
	RangeError,

	/// Anything else.
	Error,
}

impl Status
{
	pub(crate) fn is_completed(&self) -> bool
	{ matches!(self, Status::Completed) }
}


/// What the retry loop should do about a non-Completed status.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum Strategy
{
	/// The failure isn't transient, or repeating it can't help
	/// (disk full, file's just not there).
	NoRetry,

	/// Unusual one-off faults; same failure is unlikely twice in a row.
	RetryNow,

	/// Transient faults (connectivity); give the world a moment.
	RetryWithDelay,
}


/// Classify a status into a strategy.
///
/// `local_content` short-circuits everything: retrying against our own
/// disk can't change the answer.
pub(crate) fn strategy(status: Status, local_content: bool) -> Strategy
{
	use Status as S;
	use Strategy as T;

	if local_content { return T::NoRetry; }

	match status {
		S::Forbidden | S::NotFound | S::WriteError => T::NoRetry,
		S::RangeError | S::PartialFile => T::RetryNow,
		S::Error | S::Timeout => T::RetryWithDelay,
		// Shouldn't be asked about this one, but don't panic about it
		S::Completed => T::RetryNow,
	}
}
