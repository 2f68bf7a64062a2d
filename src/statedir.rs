//! The state directory: the engine's scratch and cache root.
//!
//! Layout:
//! ```text
//! <state>/staged/<hash>            fullfiles, content-addressed
//! <state>/download/                in-flight transfers
//! <state>/<version>/Manifest.*     per-version manifest trees
//! <state>/pack-<b>-from-<v>-to-<v>.tar   pack indicator files
//! <state>/Manifest-<b>-delta-from-<v>    manifest delta files
//! <state>/bundles/<bundle>         tracking markers (see tracking.rs)
//! <state>/telemetry/               spooled telemetry records
//! ```
//!
//! One operation owns the whole tree at a time; the flock here is a
//! guard against accidents, not a scheduler.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::util::hash::{HashBuf, HASH_HEX_LEN};


#[derive(Debug)]
pub(crate) struct StateDir
{
	root: PathBuf,

	/// Held (flocked) for the life of the operation.  Only an Option so
	/// tests can build unlocked ones.
	lock: Option<fs::File>,
}


impl StateDir
{
	/// Set up the state dir: make sure the tree exists with sane modes,
	/// but don't lock yet.
	pub(crate) fn init(root: &Path) -> Result<Self, io::Error>
	{
		dodir(root, Some(0o700))?;
		dodir(&root.join("staged"), None)?;
		dodir(&root.join("download"), None)?;
		dodir(&root.join("telemetry"), None)?;

		let ret = StateDir { root: root.to_path_buf(), lock: None };
		Ok(ret)
	}


	/// Take the single-writer lock.  Refusing to block is deliberate;
	/// if somebody else is mid-operation we want the user to know, not
	/// to queue.
	pub(crate) fn lock(&mut self) -> Result<(), io::Error>
	{
		use std::os::fd::AsRawFd;

		let lockfile = self.root.join("lock");
		let fh = fs::File::create(&lockfile)?;
		let ret = unsafe { libc::flock(fh.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
		if ret != 0
		{
			let e = io::Error::new(io::ErrorKind::WouldBlock,
					format!("state dir {} is locked by another process",
						self.root.display()));
			return Err(e);
		}

		// Keep the fd open; the lock dies with it.
		self.lock = Some(fh);
		Ok(())
	}


	/*
	 * Paths
	 */
	pub(crate) fn root(&self) -> &Path { &self.root }
	pub(crate) fn staged(&self) -> PathBuf { self.root.join("staged") }
	pub(crate) fn download(&self) -> PathBuf { self.root.join("download") }
	pub(crate) fn bundles(&self) -> PathBuf { self.root.join("bundles") }
	pub(crate) fn telemetry(&self) -> PathBuf { self.root.join("telemetry") }

	pub(crate) fn version_dir(&self, version: u32) -> PathBuf
	{ self.root.join(version.to_string()) }

	pub(crate) fn manifest_path(&self, version: u32, leaf: &str) -> PathBuf
	{ self.version_dir(version).join(leaf) }

	/// Full path of a staged fullfile.
	pub(crate) fn staged_file(&self, hb: &HashBuf) -> PathBuf
	{ self.staged().join(hb.as_ref()) }

	/// The zero-length indicator we leave behind after expanding a
	/// pack, so a re-run knows it already has the contents.
	pub(crate) fn pack_indicator(&self, bundle: &str, from: u32, to: u32)
			-> PathBuf
	{
		self.root.join(format!("pack-{bundle}-from-{from}-to-{to}.tar"))
	}


	/// Clear out in-flight downloads from a previous (presumably
	/// deceased) run.
	pub(crate) fn clear_download(&self) -> Result<(), io::Error>
	{
		crate::util::fs::clear_dir(&self.download())
	}


	/// Expand a downloaded pack tarball into the state dir.  Packs
	/// carry `staged/<hash>` members; anything else in there is not
	/// ours and gets skipped.
	pub(crate) fn expand_pack(&self, tarfile: &Path)
			-> Result<(), anyhow::Error>
	{
		let fh = fs::File::open(tarfile)?;
		let mut rdr = io::BufReader::new(fh);

		// Packs may or may not be gzip'd depending on server vintage;
		// sniff the magic rather than trusting the name.
		use io::BufRead as _;
		let gz = {
			let peek = rdr.fill_buf()?;
			peek.len() >= 2 && peek[0] == 0x1f && peek[1] == 0x8b
		};

		match gz {
			true => {
				let dec = flate2::bufread::GzDecoder::new(rdr);
				self.expand_pack_entries(tar::Archive::new(dec))
			},
			false => self.expand_pack_entries(tar::Archive::new(rdr)),
		}
	}

	fn expand_pack_entries<R: io::Read>(&self, mut ark: tar::Archive<R>)
			-> Result<(), anyhow::Error>
	{
		for ent in ark.entries()?
		{
			let mut ent = ent?;
			let path = ent.path()?.into_owned();
			if !path.starts_with("staged") { continue; }
			ent.unpack_in(&self.root)?;
		}
		Ok(())
	}
}


// Helper for making all the dirs
fn dodir(dir: &Path, mode: Option<u32>) -> Result<(), io::Error>
{
	// Should be there.
	if !dir.exists()
	{
		use std::fs::DirBuilder;
		use std::os::unix::fs::DirBuilderExt;
		let mut db = DirBuilder::new();
		db.recursive(true);
		if let Some(m) = mode { db.mode(m); }
		db.create(dir)?;
	}

	// Should be a dir (in case it already existed as something else)
	if !dir.is_dir()
	{
		let d_s = dir.to_string_lossy();
		let ioe = io::Error::new(io::ErrorKind::AlreadyExists, d_s);
		Err(ioe)?;
	}

	Ok(())
}



/*
 * The janitor.
 */

/// Trouble cleaning.  About the only thing that stops us is not being
/// able to list a directory; individual removal failures just warn.
#[derive(Debug)]
#[derive(thiserror::Error)]
pub(crate) enum CleanErr
{
	#[error("Couldn't list {0}")]
	ListDir(PathBuf),
}


/// Clean cached content out of the state dir.
///
/// Always: staged fullfiles, pack indicators, manifest deltas.  For the
/// per-version manifest trees: with `all`, everything; without, only
/// hash-qualified manifests, and only for versions the current MoM
/// still references (by the deliberately coarse raw-bytes substring
/// test).  The bundles/ tracking dir is never touched.
///
/// `mom_contents` is the raw bytes of the current version's MoM, if the
/// caller could get them.  Returns how many files were (or, dry,
/// would be) removed.
pub(crate) fn clean_statedir(state: &StateDir, dry_run: bool, all: bool,
		mom_contents: Option<&str>) -> Result<u32, CleanErr>
{
	let mut removed = 0u32;

	// Staged files: anything whose name is exactly hash-length.  Delete
	// specific patterns only, to avoid disasters if paths are somehow
	// set wrong.
	remove_if(&state.staged(), dry_run, &mut removed,
			|n| n.len() == HASH_HEX_LEN)?;

	// Pack presence indicator files.
	remove_if(state.root(), dry_run, &mut removed, is_pack_indicator)?;

	// Manifest delta files.
	remove_if(state.root(), dry_run, &mut removed, is_manifest_delta)?;

	// Per-version manifest trees: every all-digits subdir.
	let rd = fs::read_dir(state.root())
			.map_err(|_| CleanErr::ListDir(state.root().to_path_buf()))?;
	for ent in rd
	{
		let Ok(ent) = ent else {
			return Err(CleanErr::ListDir(state.root().to_path_buf()));
		};
		let name = ent.file_name();
		let Some(name) = name.to_str() else { continue };
		if name.is_empty() || !name.bytes().all(|b| b.is_ascii_digit())
		{ continue; }

		let vdir = state.root().join(name);

		// Not precise: this may keep manifests we don't use, and also
		// keeps the previous version.  If that extra precision is ever
		// required we should parse the manifest instead.
		let keep_plain = !all
				&& mom_contents.map(|c| c.contains(name)).unwrap_or(false);
		match keep_plain {
			true  => remove_if(&vdir, dry_run, &mut removed, is_hashed_manifest)?,
			false => remove_if(&vdir, dry_run, &mut removed, is_manifest)?,
		}

		// Remove empty dirs if possible.  Not in dry runs, which must
		// stay inert; a failed fetch can leave a version dir already
		// empty before we ever get here.
		if !dry_run
		{ let _ = fs::remove_dir(&vdir); }
	}

	Ok(removed)
}


/// Remove entries of a directory for which pred (on the file name)
/// says yes.  Doesn't recurse.  In dry_run, prints and counts instead.
fn remove_if(dir: &Path, dry_run: bool, removed: &mut u32,
		pred: impl Fn(&str) -> bool) -> Result<(), CleanErr>
{
	let rd = match fs::read_dir(dir) {
		Ok(rd) => rd,
		// A version dir vanishing mid-walk isn't exciting.
		Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
		Err(_) => return Err(CleanErr::ListDir(dir.to_path_buf())),
	};

	for ent in rd
	{
		let Ok(ent) = ent else {
			return Err(CleanErr::ListDir(dir.to_path_buf()));
		};
		let name = ent.file_name();
		let Some(name) = name.to_str() else { continue };
		if !pred(name) { continue; }

		let path = dir.join(name);
		if dry_run
		{
			println!("{}", path.display());
			*removed += 1;
			continue;
		}

		let is_dir = ent.file_type().map(|t| t.is_dir()).unwrap_or(false);
		let ret = match is_dir {
			true  => fs::remove_dir(&path),
			false => fs::remove_file(&path),
		};
		match ret {
			Ok(()) => *removed += 1,
			Err(e) => eprintln!("Warning: couldn't remove file {}: {e}",
					path.display()),
		}
	}

	Ok(())
}


/*
 * The name predicates.  Exact string tests, not patterns; the janitor
 * should never guess.
 */

fn is_pack_indicator(name: &str) -> bool
{
	name.starts_with("pack-") && name.ends_with(".tar")
		&& name.len() > "pack-".len() + ".tar".len() - 1
}

fn is_manifest_delta(name: &str) -> bool
{
	name.starts_with("Manifest-")
}

fn is_manifest(name: &str) -> bool
{
	name.starts_with("Manifest.")
}

/// A hash-qualified manifest: `Manifest.<name>.<hexhash>`, with exactly
/// one `.` after the prefix.  The dot-count rule is what excludes the
/// iterative (`Manifest.<n>.I.<v>`) and delta (`Manifest.<n>.D.<v>`)
/// forms.
fn is_hashed_manifest(name: &str) -> bool
{
	let Some(rest) = name.strip_prefix("Manifest.") else { return false };
	if rest.bytes().filter(|b| *b == b'.').count() != 1 { return false; }
	let Some((_, suffix)) = rest.rsplit_once('.') else { return false };
	!suffix.is_empty() && suffix.bytes().all(|b| b.is_ascii_hexdigit())
}
