//! Runtime configuration: URLs, roots, retry policy, and the various
//! trust knobs.
//!
//! swupd sprays these around as globals; we build them up front from
//! defaults plus command-line overrides and hang the result off the
//! engine context instead.

use std::path::{Path, PathBuf};


#[derive(Debug, Clone)]
#[derive(derivative::Derivative)]
#[derivative(Default)]
pub struct Config
{
	/// Where version information is served from.
	#[derivative(Default(value="\"https://cdn.download.clearlinux.org/update\".into()"))]
	pub(crate) version_url: String,

	/// Where content (manifests, fullfiles, packs) is served from.
	/// Usually the same server as the version URL, but mirrors may
	/// split them.
	#[derivative(Default(value="\"https://cdn.download.clearlinux.org/update\".into()"))]
	pub(crate) content_url: String,

	/// Port override for the update server.  None means whatever the
	/// URL scheme says.
	pub(crate) update_server_port: Option<u16>,

	/// The managed root.  `/` means the running system; anything else
	/// is an offline target (an image build, a mounted disk, ...).
	#[derivative(Default(value="\"/\".into()"))]
	path_prefix: PathBuf,

	/// The engine's scratch and cache root.
	///
	/// We keep the stock swupd location so caches carry over between
	/// this and the stock client; nothing in there is written in a
	/// format only we understand.
	#[derivative(Default(value="\"/var/lib/swupd\".into()"))]
	state_dir: PathBuf,


	// Retry policy for downloads.

	/// How many times to re-attempt a failed download.  Zero disables
	/// retrying entirely.
	#[derivative(Default(value="3"))]
	pub(crate) max_retries: u32,

	/// Base delay (seconds) before the first delayed retry.
	#[derivative(Default(value="10"))]
	pub(crate) retry_delay: u64,

	/// Each delayed retry multiplies the delay by this...
	#[derivative(Default(value="2"))]
	pub(crate) delay_multiplier: u64,

	/// ...capped here (seconds).
	#[derivative(Default(value="60"))]
	pub(crate) max_delay: u64,


	// Trust bits.

	/// Root certificate for MoM signature verification, relative to the
	/// managed root.
	#[derivative(Default(value="\"/usr/share/clear/update-ca/Swupd_Root.pem\".into()"))]
	pub(crate) update_ca_cert: PathBuf,

	/// Optional TLS client certificate (PEM, cert + key in one file),
	/// relative to the managed root.  Probed at init; absence is not an
	/// error.
	#[derivative(Default(value="\"/etc/swupd/client.pem\".into()"))]
	pub(crate) client_cert: PathBuf,

	/// Fallback CA directories, probed in order at init if the default
	/// trust store can't verify the version server.
	#[derivative(Default(value="vec![\"/usr/share/clear/update-ca\".into()]"))]
	pub(crate) fallback_capaths: Vec<PathBuf>,

	/// Verify the MoM signature.  Turning this off is for people
	/// running their own unsigned mirrors, and they get to keep both
	/// pieces.
	#[derivative(Default(value="true"))]
	pub(crate) sigcheck: bool,


	/// Skip the free-space admission check on install.
	pub(crate) skip_diskspace_check: bool,
}


impl Config
{
	// Kept hidden so derived paths can't drift from under us mid-run.
	pub(crate) fn path_prefix(&self) -> &Path { &self.path_prefix }
	pub(crate) fn state_dir(&self) -> &Path { &self.state_dir }


	/// Build a config from the command-line args.
	pub(crate) fn from_args(clargs: &crate::command::UpdArgs) -> Self
	{
		let mut cfg = Config::default();

		// --url sets both halves, the specific ones override further.
		if let Some(u) = &clargs.url
		{
			cfg.version_url = u.clone();
			cfg.content_url = u.clone();
		}
		if let Some(u) = &clargs.versionurl { cfg.version_url = u.clone(); }
		if let Some(u) = &clargs.contenturl { cfg.content_url = u.clone(); }
		if let Some(p) = clargs.port { cfg.update_server_port = Some(p); }

		if let Some(p) = &clargs.path { cfg.path_prefix = p.clone(); }
		if let Some(s) = &clargs.statedir { cfg.state_dir = s.clone(); }

		if clargs.nosigcheck { cfg.sigcheck = false; }

		cfg
	}


	// Tests build worlds in temp dirs, so they get to move the root.
	#[cfg(test)]
	pub(crate) fn set_path_prefix(&mut self, p: PathBuf)
	{ self.path_prefix = p; }


	/// Is the content URL something we reach without a network?  Local
	/// content changes the retry calculus: there's no point waiting out
	/// a backoff against our own disk.
	pub(crate) fn content_url_is_local(&self) -> bool
	{
		self.content_url.starts_with("file://")
	}
}



#[cfg(test)]
mod tests
{
	use super::*;

	#[test]
	fn defaults()
	{
		let cfg = Config::default();
		assert_eq!(cfg.path_prefix(), Path::new("/"));
		assert_eq!(cfg.state_dir(), Path::new("/var/lib/swupd"));
		assert_eq!(cfg.max_retries, 3);
		assert!(cfg.sigcheck);
		assert!(!cfg.content_url_is_local());
	}

	#[test]
	fn local_content()
	{
		let mut cfg = Config::default();
		cfg.content_url = "file:///srv/mirror/update".to_string();
		assert!(cfg.content_url_is_local());
	}
}
