//! The manifest graph: loading, include recursion, consolidation.
//!
//! The MoM owns its loaded submanifests; include edges are just bundle
//! names, resolved against the MoM whenever we walk.  That keeps the
//! graph acyclic-by-construction in memory even if the server hands us
//! include cycles.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::fs;
use std::path::PathBuf;

use super::{parse, sig};
use super::{Manifest, File, MOM_COMPONENT};
use crate::engine::Engine;
use crate::tracking;
use crate::util;
use crate::version;


/// Trouble walking the graph.  Which manifest wouldn't load matters to
/// the exit code, so the top is split in two.
#[derive(Debug)]
#[derive(thiserror::Error)]
pub(crate) enum GraphErr
{
	#[error("Unable to load Manifest.MoM for version {0}: {1}")]
	Mom(u32, anyhow::Error),

	#[error("Unable to load manifest {0} version {1}: {2}")]
	Manifest(String, u32, anyhow::Error),
}


/// A subscription: "this operation cares about this bundle at this
/// version".  Version zero means not-yet-pinned.
#[derive(Debug, Clone)]
pub(crate) struct Sub
{
	pub(crate) component: String,
	pub(crate) version: u32,
}


/// Is a name already in the subscription set?
pub(crate) fn subscribed(subs: &[Sub], name: &str) -> bool
{
	subs.iter().any(|s| s.component == name)
}


/// What a round of subscription-building found.  A load failure is a
/// hard error and travels separately; these two are advisory.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct SubOutcome
{
	/// At least one subscription was newly added.
	pub(crate) new: bool,

	/// At least one requested name wasn't in the MoM.
	pub(crate) bad_name: bool,
}

impl SubOutcome
{
	fn merge(&mut self, o: SubOutcome)
	{
		self.new |= o.new;
		self.bad_name |= o.bad_name;
	}
}


/*
 * Loading manifests off the server (or the caches).
 */

/// Load and verify the MoM for a version.
///
/// With `allow_mix` and a mix-enabled system, the MoM comes from the
/// local mix tree instead of the network (and skips the signature; the
/// mix tree is the administrator's own work).
pub(crate) fn load_mom(eng: &Engine, vsn: u32, allow_mix: bool)
		-> Result<Manifest, GraphErr>
{
	let mix = allow_mix && version::on_mix(eng.path_prefix());

	let inner = || -> Result<Manifest, anyhow::Error> {
		let bytes = match mix {
			true => {
				let p = version::mix_dir(eng.path_prefix())
						.join(vsn.to_string()).join("Manifest.MoM");
				fs::read(&p)?
			},
			false => {
				let local = eng.state.manifest_path(vsn, "Manifest.MoM");
				if !local.is_file()
				{
					fs::create_dir_all(eng.state.version_dir(vsn))?;
					let url = eng.content_url(vsn, "Manifest.MoM")?;
					eng.fetcher()?.get_file(&url, &local)?;
				}
				fs::read(&local)?
			},
		};

		if eng.config.sigcheck && !mix
		{
			// Signatures are small; pull through a bounded buffer and
			// cache alongside the MoM.
			const SIG_LIMIT: usize = 1024 * 1024;
			let sigfile = eng.state.manifest_path(vsn, "Manifest.MoM.sig");
			if !sigfile.is_file()
			{
				let url = eng.content_url(vsn, "Manifest.MoM.sig")?;
				let sig = eng.fetcher()?.get_memory(&url, SIG_LIMIT)?;
				fs::write(&sigfile, &sig)?;
			}
			let sigbytes = fs::read(&sigfile)?;
			let cert = util::path_join(eng.path_prefix(),
					&eng.config.update_ca_cert);
			sig::verify_mom(&cert, &bytes, &sigbytes)?;
		}

		Ok(parse(&bytes, MOM_COMPONENT)?)
	};

	inner().map_err(|e| GraphErr::Mom(vsn, e))
}


/// Load one bundle's manifest, from the MoM entry describing it.
///
/// The server publishes these under their hash-qualified name
/// (`Manifest.<bundle>.<hash>`); locally we'll take either that or a
/// plain `Manifest.<bundle>` from an earlier client, so long as the
/// content matches the hash the (verified) MoM promises.
pub(crate) fn load_manifest(eng: &Engine, entry: &File)
		-> Result<Manifest, GraphErr>
{
	let name = entry.component().into_owned();
	let vsn = entry.last_change;

	let inner = || -> Result<Manifest, anyhow::Error> {
		// A mix system may overlay this bundle locally.
		if version::on_mix(eng.path_prefix())
		{
			let p = version::mix_dir(eng.path_prefix())
					.join(vsn.to_string())
					.join(format!("Manifest.{name}"));
			if p.is_file()
			{ return Ok(parse(&fs::read(&p)?, &name)?); }
		}

		let hb = entry.hash.to_buf();
		let qualified = format!("Manifest.{name}.{hb}");
		let plain = format!("Manifest.{name}");

		// Either cached form will do if it checks out.
		for leaf in [&qualified, &plain]
		{
			let p = eng.state.manifest_path(vsn, leaf);
			if !p.is_file() { continue; }
			let bytes = fs::read(&p)?;
			if crate::util::hash::sha256_buf(&bytes) == entry.hash
			{ return Ok(parse(&bytes, &name)?); }
		}

		// Nope; go get it.
		fs::create_dir_all(eng.state.version_dir(vsn))?;
		let local = eng.state.manifest_path(vsn, &qualified);
		let url = eng.content_url(vsn, &qualified)?;
		eng.fetcher()?.get_file(&url, &local)?;

		let bytes = fs::read(&local)?;
		util::hash::check_sha256(&bytes, &entry.hash, "manifest")?;
		Ok(parse(&bytes, &name)?)
	};

	inner().map_err(|e| GraphErr::Manifest(name.clone(), vsn, e))
}


/*
 * Subscription building.
 */

/// Walk a list of names, subscribing each plus (recursively) everything
/// it includes.
///
/// Unknown names warn and skip; a manifest that won't load is fatal.
/// At depth > 0 an already-subscribed name is skipped early (the top
/// level will visit it anyway); at the top it isn't, since that's how
/// the initial tree gets built.
pub(crate) fn add_subscriptions(eng: &Engine, names: &[String],
		subs: &mut Vec<Sub>, mom: &Manifest, find_all: bool, depth: u32)
		-> Result<SubOutcome, GraphErr>
{
	let mut out = SubOutcome::default();

	for name in names
	{
		let Some(entry) = mom.search_bundle(name) else {
			eprintln!("Warning: Bundle \"{name}\" is invalid, \
					skipping it...");
			out.bad_name = true;
			continue;
		};

		if subscribed(subs, name) && depth > 0 { continue; }

		let mf = match load_manifest(eng, entry) {
			Ok(m) => m,
			Err(e) => {
				eprintln!("Error: Unable to download manifest {name} \
						version {}, exiting now", entry.last_change);
				return Err(e);
			},
		};

		if !mf.includes.is_empty()
		{
			let r = add_subscriptions(eng, &mf.includes, subs, mom,
					find_all, depth + 1)?;
			out.merge(r);
		}

		if !find_all
				&& tracking::is_installed_bundle(eng.path_prefix(), name)
		{ continue; }

		if subscribed(subs, name) { continue; }

		subs.push(Sub { component: name.clone(), version: 0 });
		out.new = true;
	}

	Ok(out)
}


/// Pin each subscription to the version its manifest last changed at,
/// per the MoM.
pub(crate) fn set_subscription_versions(mom: &Manifest, subs: &mut [Sub])
{
	for sub in subs
	{
		if let Some(e) = mom.search_bundle(&sub.component)
		{ sub.version = e.last_change; }
	}
}


/*
 * Recursion over the include graph.
 */

/// Load the submanifest of every subscribed bundle, plus everything
/// transitively included, each exactly once.  Include cycles terminate
/// (a name is marked before its includes are walked); missing names
/// warn and skip.
pub(crate) fn recurse_manifest(eng: &Engine, mom: &Manifest, subs: &[Sub])
		-> Result<Vec<Manifest>, GraphErr>
{
	let mut done: BTreeSet<String> = BTreeSet::new();
	let mut out: Vec<Manifest> = Vec::new();

	for sub in subs
	{ recurse_walk(eng, mom, &sub.component, &mut done, &mut out)?; }

	Ok(out)
}

fn recurse_walk(eng: &Engine, mom: &Manifest, name: &str,
		done: &mut BTreeSet<String>, out: &mut Vec<Manifest>)
		-> Result<(), GraphErr>
{
	// Marking *before* walking includes is what makes cycles finite.
	if !done.insert(name.to_string()) { return Ok(()); }

	let Some(entry) = mom.search_bundle(name) else {
		eprintln!("Warning: Bundle \"{name}\" not found in MoM, \
				skipping it...");
		return Ok(());
	};

	let mf = load_manifest(eng, entry)?;
	for inc in &mf.includes
	{ recurse_walk(eng, mom, inc, done, out)?; }

	out.push(mf);
	Ok(())
}


/*
 * File-list consolidation.
 */

/// Merge the file lists of a set of manifests into one view: sorted by
/// path, one entry per path, greatest last_change winning collisions.
/// Tombstones are ordinary entries here; they survive the merge and
/// mask older incarnations of their path.
pub(crate) fn consolidate_files(manifests: &[Manifest]) -> Vec<File>
{
	let mut merged: BTreeMap<PathBuf, File> = BTreeMap::new();

	for m in manifests
	{
		for f in &m.files
		{
			match merged.get(&f.path) {
				Some(cur) if cur.last_change >= f.last_change => (),
				_ => { merged.insert(f.path.clone(), f.clone()); },
			}
		}
	}

	merged.into_values().collect()
}


/// Drop the tombstones; what's left is what should exist on disk.
pub(crate) fn filter_out_deleted(files: Vec<File>) -> Vec<File>
{
	files.into_iter().filter(|f| !f.is_deleted()).collect()
}


/// Subtract the already-present: drop entries whose path *and* hash
/// match something installed.  A path match with different content
/// stays in; that file needs updating.
pub(crate) fn filter_out_existing(to_install: Vec<File>,
		installed: &[File]) -> Vec<File>
{
	use std::collections::HashMap;
	use std::path::Path;

	let have: HashMap<&Path, &crate::util::hash::Hash256> =
			installed.iter().map(|f| (f.path.as_path(), &f.hash)).collect();

	to_install.into_iter()
		.filter(|f| have.get(f.path.as_path()) != Some(&&f.hash))
		.collect()
}


/*
 * Reverse dependencies.
 */

/// Render the tree of bundles that (transitively) include `target`.
///
/// Output is display lines: `  * name` for direct requirers, and
/// `|-- name` indented 4 per level below that.  A bundle reachable via
/// several chains appears once per chain; each appearance is a real
/// include path.
pub(crate) fn required_by(mom: &Manifest, target: &str) -> Vec<String>
{
	let mut out = Vec::new();
	// Chains can't legitimately be longer than the bundle count; the
	// cap only matters if the server hands us an include cycle.
	let cap = mom.submanifests.len() + 1;
	required_by_walk(mom, target, 0, cap, &mut out);
	out
}

fn required_by_walk(mom: &Manifest, target: &str, recursion: usize,
		cap: usize, out: &mut Vec<String>)
{
	let recursion = recursion + 1;
	if recursion > cap { return; }

	for bundle in &mom.submanifests
	{
		for inc in &bundle.includes
		{
			if inc != target { continue; }

			let indent = (recursion - 1) * 4;
			let line = match recursion {
				1 => format!("{:w$}* {}", "", bundle.component,
						w = indent + 2),
				_ => format!("{:w$}|-- {}", "", bundle.component,
						w = indent),
			};
			out.push(line);
			required_by_walk(mom, &bundle.component, recursion, cap, out);
		}
	}
}



#[cfg(test)]
mod tests
{
	use super::*;
	use crate::testutil::World;

	#[test]
	fn load_and_verify()
	{
		let mut w = World::new(&["os-core"]);
		let vim = w.srv_bundle(20, "vim", &[], &[]);
		w.srv_mom(20, &[("vim", 20, vim, false)]);

		let mom = load_mom(&w.eng, 20, false).unwrap();
		assert_eq!(mom.component, "MoM");
		let entry = mom.search_bundle("vim").unwrap();

		let mf = load_manifest(&w.eng, entry).unwrap();
		assert_eq!(mf.component, "vim");

		// Second load comes off the local cache (kill the server dir to
		// prove it).
		std::fs::remove_dir_all(&w.srv).unwrap();
		let mf = load_manifest(&w.eng, entry).unwrap();
		assert_eq!(mf.component, "vim");
	}

	#[test]
	fn corrupt_manifest_refused()
	{
		let mut w = World::new(&["os-core"]);
		let vim = w.srv_bundle(20, "vim", &[], &[]);
		let mut bad = [0u8; 32];
		bad[0] = 0xfe;
		let _ = vim;
		// MoM promises a hash the server content doesn't have
		w.srv_mom(20, &[("vim", 20, bad.into(), false)]);

		let mom = load_mom(&w.eng, 20, false).unwrap();
		let entry = mom.search_bundle("vim").unwrap();
		// The server doesn't even have that name; either way it's a
		// load failure, not silent acceptance.
		assert!(load_manifest(&w.eng, entry).is_err());
	}

	#[test]
	fn subscription_closure()
	{
		let mut w = World::new(&[]);
		let nano = w.srv_bundle(20, "nano", &[], &[]);
		let vim = w.srv_bundle(20, "vim", &[], &[]);
		let editors = w.srv_bundle(20, "editors", &["vim", "nano"], &[]);
		w.srv_mom(20, &[("editors", 20, editors, false),
				("vim", 20, vim, false), ("nano", 20, nano, false)]);

		let mom = load_mom(&w.eng, 20, false).unwrap();
		let mut subs = Vec::new();
		let out = add_subscriptions(&w.eng,
				&["editors".to_string()], &mut subs, &mom, false, 0)
				.unwrap();

		assert!(out.new);
		assert!(!out.bad_name);
		let names: Vec<_> = subs.iter().map(|s| s.component.as_str()).collect();
		// Includes land before the including bundle
		assert_eq!(names, vec!["vim", "nano", "editors"]);

		set_subscription_versions(&mom, &mut subs);
		assert!(subs.iter().all(|s| s.version == 20));
	}

	#[test]
	fn bad_names_skip()
	{
		let mut w = World::new(&[]);
		let vim = w.srv_bundle(20, "vim", &[], &[]);
		w.srv_mom(20, &[("vim", 20, vim, false)]);

		let mom = load_mom(&w.eng, 20, false).unwrap();
		let mut subs = Vec::new();
		let out = add_subscriptions(&w.eng,
				&["no-such-bundle".to_string(), "vim".to_string()],
				&mut subs, &mom, false, 0).unwrap();

		assert!(out.new, "vim still got added");
		assert!(out.bad_name, "and the bogus one was noticed");
		assert_eq!(subs.len(), 1);
	}

	#[test]
	fn include_cycles_terminate()
	{
		let mut w = World::new(&[]);
		// a includes b, b includes a.  Rude, but must not hang.
		let a = w.srv_bundle(20, "a", &["b"], &[]);
		let b = w.srv_bundle(20, "b", &["a"], &[]);
		w.srv_mom(20, &[("a", 20, a, false), ("b", 20, b, false)]);

		let mom = load_mom(&w.eng, 20, false).unwrap();
		let subs = vec![
			Sub { component: "a".to_string(), version: 20 },
			Sub { component: "b".to_string(), version: 20 },
		];
		let loaded = recurse_manifest(&w.eng, &mom, &subs).unwrap();
		// Each exactly once
		assert_eq!(loaded.len(), 2);
	}

	fn mkfile(path: &str, hash: u8, lc: u32, deleted: bool) -> File
	{
		use crate::manifest::FileType;
		let mut h = [0u8; 32];
		h[0] = hash;
		File {
			path: path.into(),
			hash: h.into(),
			ftype: match deleted {
				true => FileType::Deleted,
				false => FileType::Regular,
			},
			last_change: lc,
			experimental: false,
			do_not_update: false,
			ignored: false,
			staging: None,
		}
	}

	#[test]
	fn consolidation()
	{
		let mut m1 = Manifest::default();
		m1.files = vec![
			mkfile("/usr/bin/a", 1, 10, false),
			mkfile("/usr/bin/b", 2, 10, false),
		];
		let mut m2 = Manifest::default();
		m2.files = vec![
			// Newer version of /usr/bin/a...
			mkfile("/usr/bin/a", 3, 20, false),
			// ...and a tombstone newer than b
			mkfile("/usr/bin/b", 2, 30, true),
			mkfile("/usr/bin/c", 4, 10, false),
		];

		let both = [m1, m2];
		let con = consolidate_files(&both);
		assert_eq!(con.len(), 3);

		// Sorted by path
		let paths: Vec<_> = con.iter().map(|f| f.path.clone()).collect();
		let mut sorted = paths.clone();
		sorted.sort();
		assert_eq!(paths, sorted);

		// Greatest last_change won
		assert_eq!(con[0].last_change, 20);
		// Tombstone survived the merge and masks b
		assert!(con[1].is_deleted());

		// Idempotent: consolidating the consolidation changes nothing
		let mut mm = Manifest::default();
		mm.files = con.clone();
		let again = consolidate_files(&[mm]);
		assert_eq!(again.len(), con.len());
		for (a, b) in again.iter().zip(con.iter())
		{
			assert_eq!(a.path, b.path);
			assert_eq!(a.last_change, b.last_change);
			assert_eq!(a.hash, b.hash);
		}

		// And the tombstone filter drops b
		let live = filter_out_deleted(con);
		assert_eq!(live.len(), 2);
	}

	#[test]
	fn existing_subtraction()
	{
		let to_install = vec![
			mkfile("/usr/bin/same", 1, 10, false),
			mkfile("/usr/bin/changed", 2, 20, false),
			mkfile("/usr/bin/fresh", 3, 20, false),
		];
		let installed = vec![
			mkfile("/usr/bin/same", 1, 10, false),
			mkfile("/usr/bin/changed", 9, 10, false),
		];

		let work = filter_out_existing(to_install, &installed);
		let paths: Vec<_> = work.iter()
				.map(|f| f.path.to_string_lossy().into_owned()).collect();
		// Same path+hash drops out; changed content and new files stay
		assert_eq!(paths, vec!["/usr/bin/changed", "/usr/bin/fresh"]);
	}

	#[test]
	fn reverse_deps()
	{
		// ide includes editors includes nano
		let mut mom = Manifest::default();
		let mut editors = Manifest::default();
		editors.component = "editors".to_string();
		editors.includes = vec!["nano".to_string()];
		let mut ide = Manifest::default();
		ide.component = "ide".to_string();
		ide.includes = vec!["editors".to_string()];
		let mut nano = Manifest::default();
		nano.component = "nano".to_string();
		mom.submanifests = vec![editors, ide, nano];

		let lines = required_by(&mom, "nano");
		assert_eq!(lines, vec![
			"  * editors".to_string(),
			"    |-- ide".to_string(),
		]);

		// Nothing includes ide
		assert!(required_by(&mom, "ide").is_empty());
	}

	#[test]
	fn reverse_deps_cycle_capped()
	{
		// a includes b includes a: the render can't recurse forever.
		let mut mom = Manifest::default();
		let mut a = Manifest::default();
		a.component = "a".to_string();
		a.includes = vec!["b".to_string()];
		let mut b = Manifest::default();
		b.component = "b".to_string();
		b.includes = vec!["a".to_string()];
		mom.submanifests = vec![a, b];

		let lines = required_by(&mom, "a");
		assert!(!lines.is_empty());
		assert!(lines.len() <= 4);
	}
}
