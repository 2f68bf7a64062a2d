//! Bundle operations: the reason this tool exists.

/// Installing
pub(crate) mod add;

/// Uninstalling
pub(crate) mod remove;

/// Listing and dependency queries
pub(crate) mod list;


use crate::command::UpdCode;
use crate::engine::Engine;


/// The current OS version, or the exit code for not knowing it.
/// Every operation starts here, so centralize the complaint.
pub(crate) fn current_version(eng: &Engine) -> Result<u32, UpdCode>
{
	match crate::version::get_current_version(eng.path_prefix()) {
		Ok(v) => Ok(v),
		Err(e) => {
			eprintln!("Error: Unable to determine current OS version \
					({e})");
			Err(UpdCode::CurrentVersionUnknown)
		},
	}
}
