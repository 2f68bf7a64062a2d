//! Shared scaffolding for tests: a fake managed root, a fake
//! file://-served update server, and an engine wired to both.

use std::fs;
use std::path::PathBuf;

use crate::config::Config;
use crate::engine::Engine;
use crate::fetch::Fetcher;
use crate::statedir::StateDir;
use crate::util::hash::{Hash256, sha256_buf};


pub(crate) struct World
{
	// Held for its Drop; everything below lives inside it.
	#[allow(dead_code)]
	pub(crate) td: tempfile::TempDir,

	/// The managed root (a fake `/`).
	pub(crate) root: PathBuf,

	/// The "server": a directory the engine reaches via file:// URLs.
	pub(crate) srv: PathBuf,

	pub(crate) eng: Engine,
}


impl World
{
	/// A world where `installed` bundles already have vendor markers,
	/// running OS version 20.
	pub(crate) fn new(installed: &[&str]) -> World
	{
		let td = tempfile::TempDir::new().unwrap();
		let root = td.path().join("root");
		let srv = td.path().join("srv");
		fs::create_dir_all(&srv).unwrap();

		// Vendor tracking dir + os-release
		let vdir = crate::tracking::vendor_dir(&root);
		fs::create_dir_all(&vdir).unwrap();
		fs::write(vdir.join(".MoM"), b"sentinel").unwrap();
		for b in installed
		{ fs::write(vdir.join(b), b"").unwrap(); }
		fs::create_dir_all(root.join("usr/lib")).unwrap();
		fs::write(root.join("usr/lib/os-release"), "VERSION_ID=20\n")
				.unwrap();

		let mut cfg = Config::default();
		cfg.content_url = format!("file://{}", srv.display());
		cfg.version_url = cfg.content_url.clone();
		cfg.sigcheck = false;
		cfg.max_retries = 0;
		cfg.set_path_prefix(root.clone());

		let state = StateDir::init(&td.path().join("state")).unwrap();
		let fetcher = Fetcher::new(&cfg, None).unwrap();
		let eng = Engine::for_tests(cfg, state, Some(fetcher));

		World { td, root, srv, eng }
	}


	/// Publish a bundle manifest on the server; returns its hash (for
	/// the MoM entry).
	pub(crate) fn srv_bundle(&mut self, version: u32, name: &str,
			includes: &[&str], files: &[(&str, Hash256, u32, &str)])
			-> Hash256
	{
		self.srv_bundle_sized(version, name, 0, includes, files)
	}

	/// Same, with a declared contentsize (for disk-admission tests).
	pub(crate) fn srv_bundle_sized(&mut self, version: u32, name: &str,
			contentsize: u64, includes: &[&str],
			files: &[(&str, Hash256, u32, &str)]) -> Hash256
	{
		let mut text = format!("MANIFEST\t31\nversion:\t{version}\n\
				contentsize:\t{contentsize}\n");
		for inc in includes
		{ text += &format!("includes:\t{inc}\n"); }
		text += "\n";
		for (flags, hash, lc, path) in files
		{ text += &format!("{flags}\t{}\t{lc}\t{path}\n", hash.to_buf()); }

		let h = sha256_buf(text.as_bytes());
		let vdir = self.srv.join(version.to_string());
		fs::create_dir_all(&vdir).unwrap();
		fs::write(vdir.join(format!("Manifest.{name}.{}", h.to_buf())),
				text).unwrap();
		h
	}


	/// Publish the MoM for a version: entries are (name, last_change,
	/// hash, experimental).
	pub(crate) fn srv_mom(&mut self, version: u32,
			entries: &[(&str, u32, Hash256, bool)])
	{
		let mut text = format!("MANIFEST\t31\nversion:\t{version}\n\
				contentsize:\t0\n\n");
		for (name, lc, hash, exp) in entries
		{
			let x = if *exp { 'x' } else { '.' };
			text += &format!("M..{x}\t{}\t{lc}\t{name}\n", hash.to_buf());
		}

		let vdir = self.srv.join(version.to_string());
		fs::create_dir_all(&vdir).unwrap();
		fs::write(vdir.join("Manifest.MoM"), text).unwrap();
	}


	/// Publish a fullfile under a version; returns its (content) hash.
	pub(crate) fn srv_fullfile(&mut self, version: u32, content: &[u8])
			-> Hash256
	{
		let h = sha256_buf(content);
		let fdir = self.srv.join(version.to_string()).join("files");
		fs::create_dir_all(&fdir).unwrap();
		fs::write(fdir.join(h.to_buf().as_ref().to_string()), content)
				.unwrap();
		h
	}
}
