//! Listing bundles and poking at the dependency graph.

use crate::command::{CmdList, UpdCode};
use crate::engine::Engine;
use crate::manifest::{self, Manifest};
use crate::tracking;

use itertools::Itertools as _;


/// Command: bundle-list
pub(crate) fn run(eng: &Engine, args: &CmdList) -> UpdCode
{
	if let Some(b) = &args.deps
	{ return show_included(eng, b); }

	if let Some(b) = &args.has_dep
	{ return show_required_by(eng, b, args.all); }

	match args.all {
		true  => list_installable(eng),
		false => list_local(eng),
	}
}


/// List what's installed, decorated with what the MoM knows (which
/// bundles are experimental).  The MoM is best-effort here; listing
/// what you have shouldn't require a working network.
fn list_local(eng: &Engine) -> UpdCode
{
	let mom: Option<Manifest> = match crate::version::get_current_version(
			eng.path_prefix()) {
		Ok(v) => match manifest::load_mom(eng, v, true) {
			Ok(m) => Some(m),
			Err(_) => {
				eprintln!("Warning: Could not determine which installed \
						bundles are experimental");
				None
			},
		},
		Err(_) => None,
	};

	let dir = tracking::vendor_dir(eng.path_prefix());
	let rd = match std::fs::read_dir(&dir) {
		Ok(rd) => rd,
		Err(_) => {
			eprintln!("Error: couldn't open bundles directory");
			return UpdCode::CouldntListDir;
		},
	};

	let names = rd.filter_map(|e| e.ok())
			.filter_map(|e| e.file_name().into_string().ok())
			.filter(|n| !n.starts_with('.'))
			.sorted();
	for name in names
	{
		let pretty = mom.as_ref()
				.and_then(|m| m.search_bundle(&name))
				.map(|e| e.printable_name());
		match pretty {
			Some(p) => println!("{p}"),
			None => println!("{name}"),
		}
	}

	UpdCode::Ok
}


/// List everything the current version's MoM offers.
fn list_installable(eng: &Engine) -> UpdCode
{
	let version = match crate::bundle::current_version(eng) {
		Ok(v) => v,
		Err(c) => return c,
	};

	let mom = match manifest::load_mom(eng, version, true) {
		Ok(m) => m,
		Err(e) => {
			eprintln!("Error: Cannot load official manifest MoM for \
					version {version} ({e})");
			return UpdCode::CouldntLoadMom;
		},
	};

	let names = mom.files.iter()
			.filter(|f| f.ftype == manifest::FileType::Manifest)
			.map(|f| f.printable_name())
			.sorted();
	for n in names
	{ println!("{n}"); }

	UpdCode::Ok
}


/// Show the transitive include closure of one bundle.
fn show_included(eng: &Engine, bundle: &str) -> UpdCode
{
	let version = match crate::bundle::current_version(eng) {
		Ok(v) => v,
		Err(c) => return c,
	};

	let mom = match manifest::load_mom(eng, version, false) {
		Ok(m) => m,
		Err(e) => {
			eprintln!("Error: Cannot load official manifest MoM for \
					version {version} ({e})");
			return UpdCode::CouldntLoadMom;
		},
	};

	let mut subs = Vec::new();
	let outcome = match manifest::add_subscriptions(eng,
			&[bundle.to_string()], &mut subs, &mom, true, 0) {
		Ok(o) => o,
		Err(_) => {
			eprintln!("Error: Processing error - Aborting");
			return UpdCode::CouldntLoadManifest;
		},
	};
	if outcome.bad_name
	{
		eprintln!("Error: Bad bundle name detected - Aborting");
		return UpdCode::InvalidBundle;
	}
	if !outcome.new
	{
		eprintln!("Error: Unknown error - Aborting");
		return UpdCode::UnexpectedCondition;
	}

	let deps = match manifest::recurse_manifest(eng, &mom, &subs) {
		Ok(d) => d,
		Err(_) => {
			eprintln!("Error: Cannot load included bundles");
			return UpdCode::RecurseManifest;
		},
	};

	// deps includes the asked-about bundle itself.
	if deps.len() == 1
	{
		println!("No included bundles");
		return UpdCode::Ok;
	}

	println!("Bundles included by {bundle}:");
	println!();
	for d in &deps
	{
		if d.component == bundle { continue; }
		println!("{}", d.component);
	}

	UpdCode::Ok
}


/// Show the tree of bundles that require one bundle.  `all` widens the
/// scope from installed bundles to everything installable.
fn show_required_by(eng: &Engine, bundle: &str, all: bool) -> UpdCode
{
	if !all && !tracking::is_installed_bundle(eng.path_prefix(), bundle)
	{
		println!("Bundle \"{bundle}\" does not seem to be installed");
		println!("       try passing --all to check uninstalled bundles");
		return UpdCode::BundleNotTracked;
	}

	let version = match crate::bundle::current_version(eng) {
		Ok(v) => v,
		Err(c) => return c,
	};

	let mut mom = match manifest::load_mom(eng, version, false) {
		Ok(m) => m,
		Err(e) => {
			eprintln!("Error: Unable to download/verify {version} \
					Manifest.MoM ({e})");
			return UpdCode::CouldntLoadMom;
		},
	};

	if mom.search_bundle(bundle).is_none()
	{
		eprintln!("Error: Bundle name {bundle} is invalid, aborting \
				dependency list");
		return UpdCode::InvalidBundle;
	}

	// The candidate requirers: every installable bundle, or the
	// installed set minus the target.
	let mut subs: Vec<manifest::Sub> = match all {
		true => mom.files.iter()
				.filter(|f| f.ftype == manifest::FileType::Manifest)
				.map(|f| manifest::Sub {
					component: f.component().into_owned(),
					version: f.last_change,
				})
				.collect(),
		false => {
			let mut s = match tracking::read_subscriptions(eng.path_prefix()) {
				Ok(s) => s,
				Err(e) => {
					eprintln!("Error: {e}");
					return UpdCode::CouldntListDir;
				},
			};
			s.retain(|sub| sub.component != bundle);
			s
		},
	};
	manifest::set_subscription_versions(&mom, &mut subs);

	let loaded = match manifest::recurse_manifest(eng, &mom, &subs) {
		Ok(x) => x,
		Err(_) => {
			eprintln!("Error: Cannot load MoM sub-manifests");
			return UpdCode::RecurseManifest;
		},
	};
	mom.submanifests = loaded;

	let reqd_by = manifest::required_by(&mom, bundle);
	if reqd_by.is_empty()
	{
		println!("No bundles have {bundle} as a dependency");
		return UpdCode::Ok;
	}

	let scope = match all {
		true  => "All installable and installed",
		false => "Installed",
	};
	println!("{scope} bundles that have {bundle} as a dependency:");
	println!();
	println!("format:");
	println!(" # * is-required-by");
	println!(" #   |-- is-required-by");
	println!(" # * is-also-required-by");
	println!(" # ...");
	println!();
	for line in &reqd_by
	{ println!("{line}"); }

	UpdCode::Ok
}
