//! Manifest file related structs.

use std::path::{Path, PathBuf};

use crate::util::hash::Hash256;


/// What kind of thing a file entry describes.
///
/// `Deleted` is a tombstone: the path used to exist at some earlier
/// version and is masked from the consolidated view.  `Manifest`
/// entries only show up in a MoM, where the "files" are the per-bundle
/// manifests themselves.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[derive(strum::Display)]
pub(crate) enum FileType
{
	Regular,
	Directory,
	Symlink,
	Deleted,
	Manifest,
}


/// One line of a manifest: a file, dir, symlink, tombstone, or (in the
/// MoM) a bundle reference.
#[derive(Debug, Clone)]
pub(crate) struct File
{
	/// Absolute path within the managed root.  For MoM entries this is
	/// the bundle name.
	pub(crate) path: PathBuf,

	/// Content hash; doubles as the fullfile name under staged/.
	pub(crate) hash: Hash256,

	pub(crate) ftype: FileType,

	/// The version that last changed this entry's content.
	pub(crate) last_change: u32,

	/// Marked experimental upstream (MoM entries).
	pub(crate) experimental: bool,

	/// Never overwrite this on the target (config-ish files).
	pub(crate) do_not_update: bool,

	/// Pretend this entry isn't there at all (state files etc).
	pub(crate) ignored: bool,

	/// Where the staged sidecar for this entry lives, once the applier
	/// has made one.  Never parsed from the wire.
	pub(crate) staging: Option<PathBuf>,
}

impl File
{
	pub(crate) fn is_deleted(&self) -> bool
	{ self.ftype == FileType::Deleted }

	pub(crate) fn is_dir(&self) -> bool
	{ self.ftype == FileType::Directory }

	/// The bundle name, for MoM entries.
	pub(crate) fn component(&self) -> std::borrow::Cow<str>
	{ self.path.to_string_lossy() }

	/// How a bundle name should be shown to users.
	pub(crate) fn printable_name(&self) -> String
	{
		match self.experimental {
			true  => format!("{} (experimental)", self.component()),
			false => self.component().into_owned(),
		}
	}
}


/// A parsed manifest: either the MoM or one bundle's.
#[derive(Debug, Default)]
pub(crate) struct Manifest
{
	/// Bundle name, or "MoM" for the top.
	pub(crate) component: String,

	/// Wire format revision the server published this under.
	pub(crate) format: u32,

	pub(crate) version: u32,

	/// Sum of the regular-file sizes this bundle carries; feeds the
	/// disk admission check.
	pub(crate) contentsize: u64,

	/// Names of bundles this one pulls in.
	pub(crate) includes: Vec<String>,

	/// Sorted by path, unique per path.
	pub(crate) files: Vec<File>,

	/// Loaded child manifests (MoM only); populated by the graph ops,
	/// not the parser.
	pub(crate) submanifests: Vec<Manifest>,
}

impl Manifest
{
	/// Look up a bundle entry by name (only meaningful on a MoM).
	pub(crate) fn search_bundle(&self, name: &str) -> Option<&File>
	{
		self.files.iter()
			.find(|f| f.ftype == FileType::Manifest && f.component() == name)
	}

	/// Look up a file entry by path.  The files list is sorted, so this
	/// can binary-search.
	pub(crate) fn search_file(&self, path: &Path) -> Option<&File>
	{
		self.files
			.binary_search_by(|f| f.path.as_path().cmp(path))
			.ok()
			.map(|i| &self.files[i])
	}
}
