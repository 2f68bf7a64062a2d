//! The manually-installed tracking store.
//!
//! Two directories matter here.  The vendor dir
//! (`<root>/usr/share/clear/bundles/`) is the OS's own record of what's
//! installed: one zero-byte file per bundle, shipped as part of
//! os-core's content.  Our tracking dir (`<state>/bundles/`) is the
//! subset the *user* asked for by hand; it starts life as a copy of the
//! vendor dir the first time we have anything to track.
//!
//! Nothing in here is allowed to fail an install or remove; weird state
//! in these directories MUST be handled gracefully whenever
//! encountered, so everything logs and shrugs.

use std::fs;
use std::path::{Path, PathBuf};

use crate::manifest::Sub;
use crate::statedir::StateDir;
use crate::util;
use crate::util::fs::{copy_all, is_populated_dir, rm_rf, touch_mode};


/// Where the vendor keeps the installed-bundle markers, relative to the
/// managed root.
pub(crate) const BUNDLES_DIR: &str = "/usr/share/clear/bundles";


/// The vendor bundles dir for a given root.
pub(crate) fn vendor_dir(path_prefix: &Path) -> PathBuf
{
	util::path_join(path_prefix, BUNDLES_DIR)
}


/// Is a bundle installed on the target system?  Marker existence is the
/// whole test.
pub(crate) fn is_installed_bundle(path_prefix: &Path, bundle: &str) -> bool
{
	vendor_dir(path_prefix).join(bundle).exists()
}


/// Record a bundle as manually installed.
///
/// If the tracking dir is empty or absent, this is the first time we're
/// tracking anything: we can't know what the user installed by hand
/// before now, so seed with a copy of the whole vendor dir (dropping
/// its `.MoM` sentinel), which at least makes everything currently
/// installed count as manual.  Then touch the marker.
pub(crate) fn track_installed(state: &StateDir, path_prefix: &Path,
		bundle: &str)
{
	let dst = state.bundles();

	let ret = (|| -> Result<(), std::io::Error> {
		if !is_populated_dir(&dst)
		{
			rm_rf(&dst)?;
			copy_all(&vendor_dir(path_prefix), &dst)?;

			// Remove uglies that live in the system tracking directory
			let _ = fs::remove_file(dst.join(".MoM"));

			// And it's ours now, so our perms
			use std::os::unix::fs::PermissionsExt;
			fs::set_permissions(&dst, fs::Permissions::from_mode(0o700))?;
		}

		touch_mode(&dst.join(bundle), 0o600)
	})();

	if let Err(e) = ret
	{
		eprintln!("Warning: issue creating tracking file in {} for \
				{bundle}: {e}", dst.display());
	}
}


/// Forget a bundle was manually installed.  Any weird state in the
/// tracking dir is handled by not caring.
pub(crate) fn remove_tracked(state: &StateDir, bundle: &str)
{
	let _ = fs::remove_file(state.bundles().join(bundle));
}


/// Problems listing installed bundles.
#[derive(Debug)]
#[derive(thiserror::Error)]
#[error("Couldn't list bundles directory {0}")]
pub(crate) struct ListErr(PathBuf);


/// Build a subscription per installed bundle.  Versions start unknown
/// (zero) until pinned against a MoM.
pub(crate) fn read_subscriptions(path_prefix: &Path)
		-> Result<Vec<Sub>, ListErr>
{
	let dir = vendor_dir(path_prefix);
	let rd = fs::read_dir(&dir).map_err(|_| ListErr(dir.clone()))?;

	let mut subs = Vec::new();
	for ent in rd
	{
		let ent = ent.map_err(|_| ListErr(dir.clone()))?;
		let name = ent.file_name();
		let Some(name) = name.to_str() else { continue };
		// The vendor dir carries a .MoM sentinel we don't want.
		if name.starts_with('.') { continue; }
		subs.push(Sub { component: name.to_string(), version: 0 });
	}

	// Directory order is arbitrary; don't let it leak out.
	subs.sort_by(|a, b| a.component.cmp(&b.component));
	Ok(subs)
}



#[cfg(test)]
pub(crate) mod tests
{
	use super::*;

	/// Build a fake root with some installed bundles, for our tests and
	/// other modules'.
	pub(crate) fn mkroot(bundles: &[&str])
			-> (tempfile::TempDir, PathBuf)
	{
		let td = tempfile::TempDir::new().unwrap();
		let root = td.path().to_path_buf();
		let vdir = vendor_dir(&root);
		fs::create_dir_all(&vdir).unwrap();
		fs::write(vdir.join(".MoM"), b"sentinel").unwrap();
		for b in bundles
		{ fs::write(vdir.join(b), b"").unwrap(); }
		(td, root)
	}

	fn mkstate(td: &tempfile::TempDir) -> StateDir
	{
		StateDir::init(&td.path().join("state")).unwrap()
	}

	#[test]
	fn installed_probe()
	{
		let (td, root) = mkroot(&["os-core", "editors"]);
		let _ = &td;
		assert!(is_installed_bundle(&root, "os-core"));
		assert!(is_installed_bundle(&root, "editors"));
		assert!(!is_installed_bundle(&root, "games"));
	}

	#[test]
	fn bootstrap_and_track()
	{
		let (td, root) = mkroot(&["os-core", "editors"]);
		let state = mkstate(&td);

		// First track bootstraps from the vendor dir...
		track_installed(&state, &root, "games");
		let bd = state.bundles();
		assert!(bd.join("os-core").exists(), "seeded from vendor");
		assert!(bd.join("editors").exists(), "seeded from vendor");
		assert!(bd.join("games").exists(), "and the new one");
		assert!(!bd.join(".MoM").exists(), "sentinel dropped");

		// ...later tracks just touch.
		track_installed(&state, &root, "shells");
		assert!(bd.join("shells").exists());

		// Idempotent, and untrack is quiet about absentees.
		track_installed(&state, &root, "shells");
		remove_tracked(&state, "shells");
		assert!(!bd.join("shells").exists());
		remove_tracked(&state, "shells");
	}

	#[test]
	fn subscriptions()
	{
		let (td, root) = mkroot(&["vim", "os-core", "nano"]);
		let _ = &td;
		let subs = read_subscriptions(&root).unwrap();
		let names: Vec<_> = subs.iter().map(|s| s.component.as_str()).collect();
		assert_eq!(names, vec!["nano", "os-core", "vim"], "sorted, no sentinel");
		assert!(subs.iter().all(|s| s.version == 0));
	}

	#[test]
	fn subscriptions_no_dir()
	{
		let td = tempfile::TempDir::new().unwrap();
		assert!(read_subscriptions(td.path()).is_err());
	}
}
