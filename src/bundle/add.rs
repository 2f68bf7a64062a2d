//! Installing bundles.
//!
//! The planner half turns requested names into a work set of files:
//! subscription closure, version pinning, consolidation against what's
//! already installed, and a free-space admission check.  The applier
//! half runs the phases: pack prefetch, fullfile fetch, verify, stage,
//! rename, sync, hooks.
//!
//! The stage/rename split is the whole crash-safety story: before the
//! rename pass nothing under the target root has changed (new content
//! lives in sidecars), and the rename itself is atomic per path, so an
//! interrupted install never leaves a truncated file behind.

use std::fs;
use std::path::{Path, PathBuf};

use crate::alias::AliasDefs;
use crate::command::UpdCode;
use crate::engine::Engine;
use crate::manifest::{self, Manifest, File, FileType};
use crate::telemetry;
use crate::tracking;
use crate::util;

use indicatif::ProgressBar;


/// Below this many files, packs cost more round-trips than they save.
const PACK_THRESHOLD: usize = 10;


/// Command: bundle-add
pub(crate) fn run(eng: &Engine, requested: &[String]) -> UpdCode
{
	let ret = run_inner(eng, requested);

	let class = match ret.0.is_ok() {
		true  => telemetry::Class::Info,
		false => telemetry::Class::Crit,
	};
	telemetry::record(&eng.state, telemetry::Record {
		class,
		event: "bundleadd",
		bundle: requested.join(", "),
		current_version: ret.1,
		result: ret.0.as_u8(),
		bytes: eng.total_bytes(),
		timestamp: String::new(),
	});

	ret.0
}

fn run_inner(eng: &Engine, requested: &[String]) -> (UpdCode, u32)
{
	let current_version = match crate::bundle::current_version(eng) {
		Ok(v) => v,
		Err(c) => return (c, 0),
	};

	let mom = match manifest::load_mom(eng, current_version, true) {
		Ok(m) => m,
		Err(e) => {
			eprintln!("Error: Cannot load official manifest MoM for \
					version {current_version} ({e})");
			return (UpdCode::CouldntLoadMom, current_version);
		},
	};

	// Alias expansion happens before anything looks at the names.
	let defs = AliasDefs::load(eng.path_prefix());
	let bundles = defs.expand_all(requested);

	let ret = install_bundles(eng, &bundles, mom);
	(ret, current_version)
}


/// The planner + applier, for one already-expanded request.
fn install_bundles(eng: &Engine, bundles: &[String], mut mom: Manifest)
		-> UpdCode
{
	let root = eng.path_prefix();

	/* step 1: get subscriptions for bundles to be installed */
	println!("Loading required manifests...");
	let mut subs: Vec<manifest::Sub> = Vec::new();
	let outcome = match manifest::add_subscriptions(eng, bundles,
			&mut subs, &mom, false, 0) {
		Ok(o) => o,
		Err(_) => return UpdCode::CouldntLoadManifest,
	};

	// Warn about already-installed and experimental requests.  An
	// already-installed request still gets tracked; the user clearly
	// wants it on purpose.
	let mut already_installed = 0usize;
	for b in bundles
	{
		if tracking::is_installed_bundle(root, b)
		{
			eprintln!("Warning: Bundle \"{b}\" is already installed, \
					skipping it...");
			already_installed += 1;
			tracking::track_installed(&eng.state, root, b);
		}
		if let Some(e) = mom.search_bundle(b)
		{
			if e.experimental
			{ eprintln!("Warning: Bundle {b} is experimental"); }
		}
	}

	if !outcome.new
	{
		// Nothing new to do; distinguish why.
		if outcome.bad_name { return UpdCode::InvalidBundle; }
		print_totals(bundles.len(), 0, already_installed);
		return UpdCode::Ok;
	}
	let invalid_bundle_provided = outcome.bad_name;

	/* Set the version of the subscribed bundles to the one they last
	 * changed */
	manifest::set_subscription_versions(&mom, &mut subs);

	/* Load the manifests of all bundles to be installed */
	let to_install_bundles = match manifest::recurse_manifest(eng, &mom,
			&subs) {
		Ok(x) => x,
		Err(_) => {
			eprintln!("Error: Cannot load to install bundles");
			return UpdCode::RecurseManifest;
		},
	};

	/* And of all bundles already installed */
	let mut current_subs = match tracking::read_subscriptions(root) {
		Ok(s) => s,
		Err(e) => {
			eprintln!("Error: {e}");
			return UpdCode::CouldntListDir;
		},
	};
	manifest::set_subscription_versions(&mom, &mut current_subs);
	let installed_bundles = match manifest::recurse_manifest(eng, &mom,
			&current_subs) {
		Ok(x) => x,
		Err(_) => {
			eprintln!("Error: Cannot load installed bundles");
			return UpdCode::RecurseManifest;
		},
	};

	/* step 2: consolidate into a work set */
	let installed_consolidated = manifest::consolidate_files(&installed_bundles);
	let installed_files =
			manifest::filter_out_deleted(installed_consolidated.clone());

	// The MoM keeps the consolidated installed view; the rename phase
	// falls back to it for entries staged outside this run.
	mom.submanifests = installed_bundles;
	mom.files = installed_consolidated;

	let to_install_files = manifest::consolidate_files(&to_install_bundles);
	let to_install_files = manifest::filter_out_deleted(to_install_files);
	let mut work = manifest::filter_out_existing(to_install_files,
			&installed_files);

	/* step 3: check if we have enough space */
	if !eng.config.skip_diskspace_check
	{
		let bundle_size: u64 = to_install_bundles.iter()
				.map(|m| m.contentsize).sum();
		let usrpath = util::path_join(root, "/usr/");

		// The 10% on top is a fudge factor; unpacked trees always cost
		// more than their content bytes.
		let fs_free = util::fs::free_space(&usrpath);
		let fits = match &fs_free {
			Ok(free) => (bundle_size as f64) * 1.1 <= *free as f64,
			Err(_) => false,
		};
		if !fits
		{
			match fs_free {
				Ok(free) => eprintln!("Error: Bundle too large by {}M.",
						(bundle_size.saturating_sub(free)) / 1000 / 1000),
				Err(_) => eprintln!("Error: Unable to determine free \
						space on filesystem."),
			}
			println!("NOTE: currently, only /usr/ (or the passed-in \
					path with /usr/ appended) is checked for available \
					space.");
			println!("To skip this error and install anyways, add the \
					--skip-diskspace-check flag to your command.");
			return UpdCode::DiskSpaceError;
		}
	}

	/* step 4: download necessary packs */
	let _ = eng.state.clear_download();

	if work.len() > PACK_THRESHOLD
	{
		download_packs(eng, &subs);
	}
	else
	{
		println!("No packs need to be downloaded");
	}

	/* step 5: download missing fullfiles */
	if let Err(c) = fetch_fullfiles(eng, &work)
	{
		eprintln!("Error: Could not download some files from bundles, \
				aborting bundle installation.");
		return c;
	}

	/* step 6: install the files onto the fs */
	println!("Installing bundle(s) files...");

	// First verify everything we think is staged; bad content gets
	// thrown out for one more download attempt before we give up.
	match verify_staged(eng, &work) {
		Ok(redo) if redo.is_empty() => (),
		Ok(redo) => {
			if let Err(c) = refetch_and_verify(eng, &work, &redo)
			{ return c; }
		},
		Err(c) => return c,
	}

	// Two passes: stage everything into sidecars, then flip the
	// sidecars live.  Nothing before the second pass touches a final
	// path.
	let pb = ProgressBar::new((work.len() * 2) as u64);
	for f in work.iter_mut()
	{
		pb.inc(1);
		if skip_apply(f) { continue; }
		if let Err(e) = stage_one(eng, f)
		{
			pb.abandon();
			eprintln!("Error: Failed to stage {}: {e}", f.path.display());
			return UpdCode::UnexpectedCondition;
		}
	}

	for f in work.iter()
	{
		pb.inc(1);
		if skip_apply(f) { continue; }
		if let Err(e) = rename_to_final(eng, f, &mom)
		{
			pb.abandon();
			eprintln!("Error: Failed to install {}: {e}", f.path.display());
			return UpdCode::UnexpectedCondition;
		}
	}
	pb.finish_and_clear();

	util::fs::sync_fs();

	/* step 7: post-update hooks (never fatal) */
	crate::scripts::run_post_update(eng);

	// Track the requested bundles that actually came in.
	let mut bundles_installed = 0usize;
	for m in &to_install_bundles
	{
		if bundles.iter().any(|b| b == &m.component)
		{
			bundles_installed += 1;
			tracking::track_installed(&eng.state, root, &m.component);
		}
	}

	print_totals(bundles.len(), bundles_installed, already_installed);

	// A bad name in the request taints an otherwise-fine exit.
	match invalid_bundle_provided {
		true  => UpdCode::InvalidBundle,
		false => UpdCode::Ok,
	}
}


/// The end-of-run accounting lines.
fn print_totals(requested: usize, installed: usize, already: usize)
{
	let failed = requested.saturating_sub(installed + already);
	if failed > 0
	{
		println!("Failed to install {failed} of {} bundles",
				requested - already);
	}
	else if installed > 0
	{
		println!("Successfully installed {installed} bundle{}",
				util::plural(installed));
	}
	if already > 0
	{
		let verb = if already == 1 { " was" } else { "s were" };
		println!("{already} bundle{verb} already installed");
	}
}


/// Entries the applier never touches.
fn skip_apply(f: &File) -> bool
{
	f.is_deleted() || f.do_not_update || f.ignored
}

/// Entries that have content to fetch (dirs are made, not downloaded).
fn needs_content(f: &File) -> bool
{
	!skip_apply(f)
		&& matches!(f.ftype, FileType::Regular | FileType::Symlink)
}


/*
 * Phase P: packs.
 */

/// Grab per-bundle packs and expand them into staged/.  Pure
/// optimization: any pack we can't get just means fullfiles do the
/// work.
fn download_packs(eng: &Engine, subs: &[manifest::Sub])
{
	println!("Downloading packs...");

	for sub in subs
	{
		if sub.version == 0 { continue; }

		let ind = eng.state.pack_indicator(&sub.component, 0, sub.version);
		if ind.is_file() { continue; }

		let leaf = format!("pack-{}-from-0.tar", sub.component);
		let Ok(url) = eng.content_url(sub.version, &leaf) else { continue };
		let dl = eng.state.download().join(&leaf);

		let fret = eng.fetcher()
				.and_then(|f| Ok(f.get_file_resume(&url, &dl)?));
		match fret {
			Ok(()) => {
				match eng.state.expand_pack(&dl) {
					Ok(()) => {
						let _ = util::fs::touch_mode(&ind, 0o644);
					},
					Err(e) => eprintln!("Warning: couldn't expand pack \
							for {}: {e}", sub.component),
				}
				let _ = fs::remove_file(&dl);
			},
			Err(_) => println!("Pack for {} not available, falling \
					back to fullfiles", sub.component),
		}
	}
}


/*
 * Phase F: fullfiles.
 */

/// Fetch the fullfile for every work-set entry that isn't already
/// staged (by a pack, or a previous run).
fn fetch_fullfiles(eng: &Engine, work: &[File]) -> Result<(), UpdCode>
{
	for f in work
	{
		if !needs_content(f) { continue; }
		if eng.state.staged_file(&f.hash.to_buf()).is_file() { continue; }
		fetch_one_fullfile(eng, f)?;
	}
	Ok(())
}

fn fetch_one_fullfile(eng: &Engine, f: &File) -> Result<(), UpdCode>
{
	let inner = || -> Result<(), anyhow::Error> {
		let hb = f.hash.to_buf();
		let url = eng.content_url(f.last_change, &format!("files/{hb}"))?;
		let dl = eng.state.download().join(hb.as_ref().to_string());
		eng.fetcher()?.get_file(&url, &dl)?;
		fs::rename(&dl, eng.state.staged_file(&hb))?;
		Ok(())
	};

	inner().map_err(|e| {
		eprintln!("Error: download of {} failed: {e}", f.path.display());
		UpdCode::UnexpectedCondition
	})
}


/*
 * Phase V: verify.
 */

/// Re-hash everything staged for the work set.  Corrupt content is
/// removed and reported back for a second (and last) download attempt.
fn verify_staged(eng: &Engine, work: &[File]) -> Result<Vec<usize>, UpdCode>
{
	let mut redo = Vec::new();

	for (i, f) in work.iter().enumerate()
	{
		if !needs_content(f) { continue; }

		let hashpath = eng.state.staged_file(&f.hash.to_buf());
		if !hashpath.is_file()
		{
			// Pack promised it but didn't deliver, or a janitor raced
			// us.  Either way, re-download.
			redo.push(i);
			continue;
		}

		let ok = util::hash::sha256_file(&hashpath)
				.map(|got| got == f.hash).unwrap_or(false);
		if ok { continue; }

		eprintln!("Warning: hash check failed for {}", f.path.display());
		println!("         will attempt to download fullfile for {}",
				f.path.display());
		if fs::remove_file(&hashpath).is_err()
		{
			eprintln!("Error: could not remove bad file {}",
					hashpath.display());
			return Err(UpdCode::CouldntRemoveFile);
		}
		redo.push(i);
	}

	Ok(redo)
}

/// The one retry verify_staged grants.  A second bad hash is fatal.
fn refetch_and_verify(eng: &Engine, work: &[File], redo: &[usize])
		-> Result<(), UpdCode>
{
	for &i in redo
	{
		let f = &work[i];
		fetch_one_fullfile(eng, f)?;

		let hashpath = eng.state.staged_file(&f.hash.to_buf());
		let ok = util::hash::sha256_file(&hashpath)
				.map(|got| got == f.hash).unwrap_or(false);
		if !ok
		{
			eprintln!("Error: hash check failed again for {}, giving up",
					f.path.display());
			return Err(UpdCode::UnexpectedCondition);
		}
	}
	Ok(())
}


/*
 * Phases S and R: stage, then rename.
 */

/// The sidecar name a staged regular file waits under.
fn update_path(dst: &Path) -> PathBuf
{
	let mut os = dst.as_os_str().to_os_string();
	os.push(".update");
	PathBuf::from(os)
}


/// Stage one entry.  Regular files land in a `.update` sidecar next to
/// their final path; directories and symlinks take their final names
/// directly (symlinks by unlink-then-create, which is as atomic as we
/// need, since the content "switch" for links is the create itself).
fn stage_one(eng: &Engine, f: &mut File) -> Result<(), anyhow::Error>
{
	let dst = util::path_join(eng.path_prefix(), &f.path);
	if let Some(parent) = dst.parent()
	{ fs::create_dir_all(parent)?; }

	// A path that changed type between versions gets its old inode
	// cleared out before the new one goes in.
	if let Ok(md) = fs::symlink_metadata(&dst)
	{
		let same = match f.ftype {
			FileType::Directory => md.is_dir(),
			FileType::Regular   => md.is_file(),
			FileType::Symlink   => md.is_symlink(),
			_ => true,
		};
		if !same
		{
			match md.is_dir() {
				true  => fs::remove_dir_all(&dst)?,
				false => fs::remove_file(&dst)?,
			}
		}
	}

	let hb = f.hash.to_buf();
	match f.ftype {
		FileType::Directory => {
			fs::create_dir_all(&dst)?;
		},
		FileType::Regular => {
			let sidecar = update_path(&dst);
			fs::copy(eng.state.staged_file(&hb), &sidecar)?;
			f.staging = Some(sidecar);
		},
		FileType::Symlink => {
			// The staged content for a link *is* its target path.
			let tgtbytes = fs::read(eng.state.staged_file(&hb))?;
			let tgt = String::from_utf8(tgtbytes)
					.map_err(|_| anyhow::anyhow!("link target for {} \
							isn't text", f.path.display()))?;
			if fs::symlink_metadata(&dst).is_ok()
			{ fs::remove_file(&dst)?; }
			std::os::unix::fs::symlink(&tgt, &dst)?;
		},
		_ => unreachable!("tombstones and MoM entries never stage"),
	}

	Ok(())
}


/// Promote one staged entry to its final path.  Only regular files
/// have anything left to do; the rename is the atomic flip.
fn rename_to_final(eng: &Engine, f: &File, mom: &Manifest)
		-> Result<(), anyhow::Error>
{
	match f.ftype {
		FileType::Regular => (),
		// Dirs and links already wear their final names.
		_ => return Ok(()),
	}

	let dst = util::path_join(eng.path_prefix(), &f.path);
	let sidecar = match &f.staging {
		Some(s) => s.clone(),
		None => {
			// Staged outside this run (a repair pass); the MoM's
			// consolidated view keeps those records.  Failing that,
			// the sidecar convention is fixed, so try it.
			mom.search_file(&f.path)
				.and_then(|m| m.staging.clone())
				.unwrap_or_else(|| update_path(&dst))
		},
	};

	fs::rename(&sidecar, &dst)?;
	Ok(())
}



#[cfg(test)]
mod tests
{
	use super::*;
	use crate::testutil::World;
	use crate::util::hash::Hash256;

	/// Stand up the classic editors world: os-core installed, editors
	/// includes vim and nano, everybody carries their own vendor
	/// marker.  Returns the world plus vim's binary hash for poking.
	fn editors_world() -> (World, Hash256)
	{
		let mut w = World::new(&["os-core"]);

		let empty = w.srv_fullfile(20, b"");
		let vimbin = w.srv_fullfile(20, b"#!vim binary");
		let nanobin = w.srv_fullfile(20, b"#!nano binary");
		let vitgt = w.srv_fullfile(20, b"/usr/bin/vim");

		let oscore = w.srv_bundle(20, "os-core", &[], &[
			("F...", empty, 20, "/usr/share/clear/bundles/os-core"),
		]);
		let vim = w.srv_bundle(20, "vim", &[], &[
			("F...", vimbin, 20, "/usr/bin/vim"),
			("L...", vitgt, 20, "/usr/bin/vi"),
			("D...", empty, 20, "/usr/share/vim"),
			("F...", empty, 20, "/usr/share/clear/bundles/vim"),
		]);
		let nano = w.srv_bundle(20, "nano", &[], &[
			("F...", nanobin, 20, "/usr/bin/nano"),
			("F...", empty, 20, "/usr/share/clear/bundles/nano"),
		]);
		let editors = w.srv_bundle(20, "editors", &["vim", "nano"], &[
			("F...", empty, 20, "/usr/share/clear/bundles/editors"),
		]);
		w.srv_mom(20, &[
			("os-core", 20, oscore, false),
			("vim", 20, vim, false),
			("nano", 20, nano, false),
			("editors", 20, editors, false),
		]);

		(w, vimbin)
	}

	#[test]
	fn fresh_install()
	{
		let (w, _) = editors_world();

		let ret = run(&w.eng, &["editors".to_string()]);
		assert_eq!(ret, UpdCode::Ok);

		// Files landed, with the right content
		assert_eq!(fs::read(w.root.join("usr/bin/vim")).unwrap(),
				b"#!vim binary");
		assert_eq!(fs::read(w.root.join("usr/bin/nano")).unwrap(),
				b"#!nano binary");
		assert!(w.root.join("usr/share/vim").is_dir());

		// The symlink resolves through the root
		let vi = w.root.join("usr/bin/vi");
		assert!(vi.is_symlink());
		assert_eq!(fs::read_link(&vi).unwrap(),
				PathBuf::from("/usr/bin/vim"));

		// No sidecars left behind
		assert!(!w.root.join("usr/bin/vim.update").exists());

		// Installed-predicate holds for the whole closure (markers are
		// bundle content), and the tracking store knows about them.
		for b in ["editors", "vim", "nano"]
		{
			assert!(crate::tracking::is_installed_bundle(&w.root, b),
					"{b} installed");
			assert!(w.eng.state.bundles().join(b).exists(),
					"{b} tracked");
		}
	}

	#[test]
	fn install_is_idempotent()
	{
		let (w, _) = editors_world();
		assert_eq!(run(&w.eng, &["editors".to_string()]), UpdCode::Ok);

		let before = fs::metadata(w.root.join("usr/bin/vim")).unwrap()
				.modified().unwrap();

		// Round two: already installed, exit Ok, nothing rewritten.
		assert_eq!(run(&w.eng, &["editors".to_string()]), UpdCode::Ok);
		let after = fs::metadata(w.root.join("usr/bin/vim")).unwrap()
				.modified().unwrap();
		assert_eq!(before, after);
	}

	#[test]
	fn unknown_bundle()
	{
		let (w, _) = editors_world();
		let ret = run(&w.eng, &["no-such-bundle".to_string()]);
		assert_eq!(ret, UpdCode::InvalidBundle);
		assert!(!w.root.join("usr/bin/vim").exists(), "nothing written");
	}

	#[test]
	fn unknown_plus_known_still_taints_exit()
	{
		let (w, _) = editors_world();
		let ret = run(&w.eng,
				&["no-such-bundle".to_string(), "vim".to_string()]);
		// vim went in...
		assert!(w.root.join("usr/bin/vim").is_file());
		assert!(w.eng.state.bundles().join("vim").exists());
		// ...but the exit remembers the bogus name
		assert_eq!(ret, UpdCode::InvalidBundle);
	}

	#[test]
	fn disk_admission()
	{
		let mut w = World::new(&["os-core"]);
		let empty = w.srv_fullfile(20, b"");
		let oscore = w.srv_bundle(20, "os-core", &[], &[]);
		// A bundle claiming more content than any filesystem has
		let huge = w.srv_bundle_sized(20, "huge", u64::MAX / 2, &[], &[
			("F...", empty, 20, "/usr/bin/huge"),
		]);
		w.srv_mom(20, &[("os-core", 20, oscore, false),
				("huge", 20, huge, false)]);

		let ret = run(&w.eng, &["huge".to_string()]);
		assert_eq!(ret, UpdCode::DiskSpaceError);
		assert!(!w.root.join("usr/bin/huge").exists());
		assert!(!w.root.join("usr/bin/huge.update").exists());
	}

	#[test]
	fn corrupt_staged_file_is_refetched()
	{
		let (w, vimbin) = editors_world();

		// Poison the staged copy ahead of time; the verify pass should
		// notice, toss it, and re-download the real thing.
		let staged = w.eng.state.staged_file(&vimbin.to_buf());
		fs::write(&staged, b"bitrot").unwrap();

		assert_eq!(run(&w.eng, &["vim".to_string()]), UpdCode::Ok);
		assert_eq!(fs::read(w.root.join("usr/bin/vim")).unwrap(),
				b"#!vim binary");
	}

	#[test]
	fn type_change_is_replaced()
	{
		let (w, _) = editors_world();

		// Something else already squats where vim's dir wants to be
		fs::create_dir_all(w.root.join("usr/share")).unwrap();
		fs::write(w.root.join("usr/share/vim"), b"not a dir").unwrap();

		assert_eq!(run(&w.eng, &["vim".to_string()]), UpdCode::Ok);
		assert!(w.root.join("usr/share/vim").is_dir());
	}

	#[test]
	fn experimental_warns_but_installs()
	{
		let mut w = World::new(&["os-core"]);
		let empty = w.srv_fullfile(20, b"");
		let oscore = w.srv_bundle(20, "os-core", &[], &[]);
		let labs = w.srv_bundle(20, "labs", &[], &[
			("F...", empty, 20, "/usr/share/clear/bundles/labs"),
		]);
		w.srv_mom(20, &[("os-core", 20, oscore, false),
				("labs", 20, labs, true)]);

		assert_eq!(run(&w.eng, &["labs".to_string()]), UpdCode::Ok);
		assert!(crate::tracking::is_installed_bundle(&w.root, "labs"));
	}
}
