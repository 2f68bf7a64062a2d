//! Figuring out what OS version we're running.
//!
//! The current version comes out of os-release under the managed root.
//! That's also where we sniff for the "mix" markers, which say the
//! system carries a locally-built overlay of the manifest tree.

use std::path::{Path, PathBuf};

use thiserror::Error;


/// Problems figuring the current version
#[derive(Debug)]
#[derive(Error)]
pub(crate) enum VersionErr
{
	/// Couldn't read the file at all
	#[error("Can't read os-release: {0}")]
	IO(#[from] std::io::Error),

	/// Read it, couldn't find a version in it
	#[error("No usable VERSION_ID in {0}")]
	NoVersion(PathBuf),

	/// Found one, couldn't parse it
	#[error("Unparseable VERSION_ID '{0}'")]
	BadVersion(String),
}


/// Get the current OS version from a given root.
///
/// This is the `VERSION_ID=` line of `usr/lib/os-release`; on these
/// systems that's a bare integer that bumps with every published
/// release.
pub(crate) fn get_current_version(path_prefix: &Path)
		-> Result<u32, VersionErr>
{
	let osrel = crate::util::path_join(path_prefix, "/usr/lib/os-release");
	let contents = std::fs::read_to_string(&osrel)?;
	parse_os_release(&contents)
		.ok_or_else(|| VersionErr::NoVersion(osrel.clone()))?
		.map_err(|bad| VersionErr::BadVersion(bad))
}


/// The guts of the os-release scan, split out so tests don't need a
/// filesystem.
fn parse_os_release(contents: &str) -> Option<Result<u32, String>>
{
	for line in contents.lines()
	{
		let line = line.trim();
		let Some(val) = line.strip_prefix("VERSION_ID=") else { continue };

		// Values may be quoted, per os-release(5)
		let val = val.trim_matches(|c| c == '"' || c == '\'');
		let ret = val.parse::<u32>().map_err(|_| val.to_string());
		return Some(ret);
	}
	None
}


/// Where a mix overlay keeps its published tree.
pub(crate) fn mix_dir(path_prefix: &Path) -> PathBuf
{
	crate::util::path_join(path_prefix, "/usr/share/mix/update/www")
}


/// Does this system carry (and opt into) a local mix?  Both halves have
/// to hold: the mix content tree exists, and the enable marker is set.
pub(crate) fn on_mix(path_prefix: &Path) -> bool
{
	let marker = crate::util::path_join(path_prefix,
			"/usr/share/mix/.clear-mix-enabled");
	mix_dir(path_prefix).is_dir() && marker.is_file()
}
