//! General command handling.  This is sorta the central dispatch for
//! everything that goes on.

/// Command-line parsing and handling
mod line;
pub(crate) use line::{UpdArgs, UpdCmds, CmdList};
pub use line::parse;


use std::process::ExitCode;


/// Process exit codes.  These are contract: scripts and callers key
/// off them, so the numbers are stable.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
pub enum UpdCode
{
	Ok = 0,
	CurrentVersionUnknown = 1,
	CouldntLoadMom = 2,
	CouldntLoadManifest = 3,
	RecurseManifest = 4,
	InvalidBundle = 5,
	BundleNotTracked = 6,
	RequiredBundleError = 7,
	DiskSpaceError = 8,
	CouldntRemoveFile = 9,
	BadCert = 10,

	/// Reserved for wall-clock failures in cleaning decisions.
	TimeUnknown = 11,

	CouldntListDir = 12,
	UnexpectedCondition = 13,
	InvalidOption = 14,
}

impl UpdCode
{
	pub fn as_u8(self) -> u8 { self as u8 }

	pub(crate) fn is_ok(self) -> bool { self == UpdCode::Ok }
}

impl From<UpdCode> for ExitCode
{
	fn from(c: UpdCode) -> Self { ExitCode::from(c as u8) }
}


/// Pass a bunch of info to the individual command runners as a block
#[derive(Debug)]
pub(crate) struct CmdArg
{
	/// The command-line args
	pub(crate) clargs: UpdArgs,

	/// The working config
	pub(crate) config: crate::config::Config,
}


/// Dispatch a command
pub fn run(clargs: UpdArgs) -> ExitCode
{
	use crate::*;

	// Build up config from defaults + overrides
	let config = config::Config::from_args(&clargs);

	let carg = CmdArg { clargs, config };

	use line::UpdCmds as UC;
	let code: UpdCode = match carg.clargs.command {
		UC::BundleAdd{..}    => cmd::add::run(carg),
		UC::BundleRemove{..} => cmd::remove::run(carg),
		UC::BundleList{..}   => cmd::list::run(carg),
		UC::Clean{..}        => cmd::clean::run(carg),
	};
	code.into()
}



#[cfg(test)]
mod tests
{
	use super::*;

	#[test]
	fn stable_codes()
	{
		// These numbers are API; don't let a refactor reshuffle them.
		assert_eq!(UpdCode::Ok.as_u8(), 0);
		assert_eq!(UpdCode::CurrentVersionUnknown.as_u8(), 1);
		assert_eq!(UpdCode::CouldntLoadMom.as_u8(), 2);
		assert_eq!(UpdCode::CouldntLoadManifest.as_u8(), 3);
		assert_eq!(UpdCode::RecurseManifest.as_u8(), 4);
		assert_eq!(UpdCode::InvalidBundle.as_u8(), 5);
		assert_eq!(UpdCode::BundleNotTracked.as_u8(), 6);
		assert_eq!(UpdCode::RequiredBundleError.as_u8(), 7);
		assert_eq!(UpdCode::DiskSpaceError.as_u8(), 8);
		assert_eq!(UpdCode::CouldntRemoveFile.as_u8(), 9);
		assert_eq!(UpdCode::BadCert.as_u8(), 10);
		assert_eq!(UpdCode::TimeUnknown.as_u8(), 11);
		assert_eq!(UpdCode::CouldntListDir.as_u8(), 12);
		assert_eq!(UpdCode::UnexpectedCondition.as_u8(), 13);
		assert_eq!(UpdCode::InvalidOption.as_u8(), 14);
	}
}
