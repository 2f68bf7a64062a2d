//! Uninstalling bundles.
//!
//! The shape of a removal: figure out what every *other* installed
//! bundle still needs, refuse if one of them needs the target itself,
//! and unlink whatever the target owned exclusively.  Shared files
//! stay; they were never ours alone to take.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use crate::command::UpdCode;
use crate::engine::Engine;
use crate::manifest::{self, CORE_BUNDLE};
use crate::telemetry;
use crate::tracking;
use crate::util;


/// Command: bundle-remove
///
/// Bundles are processed independently; one refusing doesn't stop the
/// rest, and the exit code is the last per-bundle failure.
pub(crate) fn run(eng: &Engine, bundles: &[String]) -> UpdCode
{
	let current_version = match crate::bundle::current_version(eng) {
		Ok(v) => v,
		Err(c) => {
			telemetry::record(&eng.state, telemetry::Record {
				class: telemetry::Class::Crit,
				event: "bundleremove",
				bundle: bundles.first().cloned().unwrap_or_default(),
				current_version: 0,
				result: c.as_u8(),
				bytes: eng.total_bytes(),
				timestamp: String::new(),
			});
			return c;
		},
	};

	let mut ret_code = UpdCode::Ok;
	let mut bad = 0usize;
	let mut total = 0usize;

	let announce = bundles.len() > 1;
	for bundle in bundles
	{
		let ret = remove_one(eng, bundle, current_version, announce);

		telemetry::record(&eng.state, telemetry::Record {
			class: match ret.is_ok() {
				true  => telemetry::Class::Info,
				false => telemetry::Class::Crit,
			},
			event: "bundleremove",
			bundle: bundle.clone(),
			current_version,
			result: ret.as_u8(),
			bytes: eng.total_bytes(),
			timestamp: String::new(),
		});

		total += 1;
		if !ret.is_ok()
		{
			ret_code = ret;
			bad += 1;
		}
	}

	if bad > 0
	{
		println!("Failed to remove {bad} of {total} bundles");
	}
	else
	{
		println!("Successfully removed {total} bundle{}",
				util::plural(total));
	}

	ret_code
}


fn remove_one(eng: &Engine, bundle: &str, current_version: u32,
		announce: bool) -> UpdCode
{
	let root = eng.path_prefix();

	// os-core holds the system together; refuse up front.
	if bundle == CORE_BUNDLE
	{
		eprintln!("Warning: Bundle \"{CORE_BUNDLE}\" not allowed to be \
				removed");
		return UpdCode::RequiredBundleError;
	}

	if !tracking::is_installed_bundle(root, bundle)
	{
		eprintln!("Warning: Bundle \"{bundle}\" is not installed, \
				skipping it...");
		return UpdCode::BundleNotTracked;
	}

	if announce { println!("Removing bundle: {bundle}"); }

	let mut mom = match manifest::load_mom(eng, current_version, true) {
		Ok(m) => m,
		Err(e) => {
			eprintln!("Error: Unable to download/verify {current_version} \
					Manifest.MoM ({e})");
			return UpdCode::CouldntLoadMom;
		},
	};

	let Some(target_entry) = mom.search_bundle(bundle) else {
		eprintln!("Error: Bundle name is invalid, aborting removal");
		return UpdCode::InvalidBundle;
	};
	let target_entry = target_entry.clone();

	// Subscribe everything installed, then drop the target.
	let mut subs = match tracking::read_subscriptions(root) {
		Ok(s) => s,
		Err(e) => {
			eprintln!("Error: {e}");
			return UpdCode::CouldntListDir;
		},
	};
	let before = subs.len();
	subs.retain(|s| s.component != bundle);
	if subs.len() == before
	{
		// Installed per the marker but not in the subscription list;
		// weird state, treat like not-tracked.
		eprintln!("Error: Unable to untrack {bundle}");
		return UpdCode::BundleNotTracked;
	}
	manifest::set_subscription_versions(&mom, &mut subs);

	// Load what survives.
	let survivors = match manifest::recurse_manifest(eng, &mom, &subs) {
		Ok(x) => x,
		Err(_) => {
			eprintln!("Error: Cannot load MoM sub-manifests");
			return UpdCode::RecurseManifest;
		},
	};
	mom.submanifests = survivors;

	// Anyone still need us?
	let reqd_by = manifest::required_by(&mom, bundle);
	if !reqd_by.is_empty()
	{
		eprintln!("Error: bundle requested to be removed is required by \
				the following bundles:");
		println!("format:");
		println!(" # * is-required-by");
		println!(" #   |-- is-required-by");
		println!(" # * is-also-required-by");
		println!(" # ...");
		println!();
		for line in &reqd_by
		{ println!("{line}"); }
		return UpdCode::RequiredBundleError;
	}

	// What the survivors keep alive, by path.
	let retained = manifest::consolidate_files(&mom.submanifests);
	let retained_paths: HashSet<&Path> =
			retained.iter().map(|f| f.path.as_path()).collect();

	// Now the target's own manifest, to know what it owned.
	let target_mf = match manifest::load_manifest(eng, &target_entry) {
		Ok(m) => m,
		Err(e) => {
			eprintln!("Error: Cannot load {bundle} sub-manifest ({e})");
			return UpdCode::CouldntLoadManifest;
		},
	};

	println!("Deleting bundle files...");
	let mut deleted = 0usize;

	// Files first (the manifest is path-sorted, so this is also
	// parent-before-child order)...
	for f in &target_mf.files
	{
		if f.is_deleted() || f.is_dir() { continue; }
		if retained_paths.contains(f.path.as_path()) { continue; }

		let dst = util::path_join(root, &f.path);
		match fs::remove_file(&dst) {
			Ok(()) => deleted += 1,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => (),
			Err(e) => eprintln!("Warning: couldn't remove {}: {e}",
					dst.display()),
		}
	}

	// ...then directories deepest-first, so children go before
	// parents.  Non-empty ones (still shared with someone) stay, and
	// that's fine.
	for f in target_mf.files.iter().rev()
	{
		if !f.is_dir() { continue; }
		if retained_paths.contains(f.path.as_path()) { continue; }

		let dst = util::path_join(root, &f.path);
		match fs::remove_dir(&dst) {
			Ok(()) => deleted += 1,
			Err(_) => (),
		}
	}

	println!("Total deleted files: {deleted}");

	tracking::remove_tracked(&eng.state, bundle);

	UpdCode::Ok
}



#[cfg(test)]
mod tests
{
	use super::*;
	use crate::testutil::World;

	/// A world with editors (includes nano) and nano both installed,
	/// sharing a common file.  Everything's already on disk, as if a
	/// previous install put it there.
	fn installed_world() -> World
	{
		let mut w = World::new(&["os-core", "editors", "nano", "vim"]);

		let mkhash = |b: &[u8]| crate::util::hash::sha256_buf(b);

		let oscore = w.srv_bundle(20, "os-core", &[], &[
			("F...", mkhash(b""), 20, "/usr/share/clear/bundles/os-core"),
		]);
		let nano = w.srv_bundle(20, "nano", &[], &[
			("F...", mkhash(b"nano"), 20, "/usr/bin/nano"),
			("F...", mkhash(b"shared"), 20, "/usr/share/doc/editors.txt"),
			("F...", mkhash(b""), 20, "/usr/share/clear/bundles/nano"),
		]);
		let vim = w.srv_bundle(20, "vim", &[], &[
			("F...", mkhash(b"vim"), 20, "/usr/bin/vim"),
			("F...", mkhash(b""), 20, "/usr/share/clear/bundles/vim"),
		]);
		let editors = w.srv_bundle(20, "editors", &["nano"], &[
			("D...", mkhash(b""), 20, "/usr/share/editors"),
			("F...", mkhash(b"edcfg"), 20, "/usr/share/editors/config"),
			("F...", mkhash(b"shared"), 20, "/usr/share/doc/editors.txt"),
			("F...", mkhash(b""), 20, "/usr/share/clear/bundles/editors"),
		]);
		w.srv_mom(20, &[
			("os-core", 20, oscore, false),
			("nano", 20, nano, false),
			("vim", 20, vim, false),
			("editors", 20, editors, false),
		]);

		// Materialize the installed files on disk.
		for (p, c) in [
			("usr/bin/nano", &b"nano"[..]),
			("usr/bin/vim", b"vim"),
			("usr/share/editors/config", b"edcfg"),
			("usr/share/doc/editors.txt", b"shared"),
		]
		{
			let full = w.root.join(p);
			fs::create_dir_all(full.parent().unwrap()).unwrap();
			fs::write(full, c).unwrap();
		}

		w
	}

	#[test]
	fn core_is_sacred()
	{
		let w = installed_world();
		let ret = run(&w.eng, &["os-core".to_string()]);
		assert_eq!(ret, UpdCode::RequiredBundleError);
		assert!(w.root.join("usr/bin/nano").exists());
	}

	#[test]
	fn not_installed_skips()
	{
		let w = installed_world();
		let ret = run(&w.eng, &["games".to_string()]);
		assert_eq!(ret, UpdCode::BundleNotTracked);
	}

	#[test]
	fn required_bundle_refused()
	{
		let w = installed_world();
		// editors includes nano, so nano can't go
		let ret = run(&w.eng, &["nano".to_string()]);
		assert_eq!(ret, UpdCode::RequiredBundleError);
		assert!(w.root.join("usr/bin/nano").exists(), "no files touched");
		assert!(crate::tracking::is_installed_bundle(&w.root, "nano"));
	}

	#[test]
	fn exclusive_files_removed_shared_kept()
	{
		let w = installed_world();

		// Seed the tracking store so the marker removal is observable.
		crate::tracking::track_installed(&w.eng.state, &w.root, "editors");
		assert!(w.eng.state.bundles().join("editors").exists());

		let ret = run(&w.eng, &["editors".to_string()]);
		assert_eq!(ret, UpdCode::Ok);

		// Exclusively-owned content went away, dir included
		assert!(!w.root.join("usr/share/editors/config").exists());
		assert!(!w.root.join("usr/share/editors").exists());
		// Shared-with-nano content stayed
		assert_eq!(fs::read(w.root.join("usr/share/doc/editors.txt"))
				.unwrap(), b"shared");
		// Unrelated bundles untouched
		assert!(w.root.join("usr/bin/nano").exists());
		assert!(w.root.join("usr/bin/vim").exists());
		// And the tracking marker is gone
		assert!(!w.eng.state.bundles().join("editors").exists());
	}

	#[test]
	fn mixed_batch_keeps_last_failure()
	{
		let w = installed_world();
		// vim removes fine; nano is still required by editors.
		let ret = run(&w.eng,
				&["vim".to_string(), "nano".to_string()]);
		assert_eq!(ret, UpdCode::RequiredBundleError);
		assert!(!w.root.join("usr/bin/vim").exists(), "vim went");
		assert!(w.root.join("usr/bin/nano").exists(), "nano stayed");
	}
}
