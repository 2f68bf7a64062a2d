//! The engine context: everything an operation needs, in one value.
//!
//! swupd keeps a pile of process-wide mutables for this (the transfer
//! handle, the byte counter, the latched CA path, the state paths).
//! We fold all of that into one Engine that gets built at the top of a
//! command and threaded through.

use std::path::Path;

use crate::config::Config;
use crate::fetch::{self, Fetcher};
use crate::statedir::StateDir;

use url::Url;


#[derive(Debug)]
#[derive(thiserror::Error)]
pub(crate) enum InitErr
{
	/// State dir setup or locking trouble.
	#[error("State directory problem: {0}")]
	State(#[from] std::io::Error),

	/// Couldn't establish a trusted connection.
	#[error(transparent)]
	Probe(#[from] fetch::ProbeErr),

	/// TLS plumbing wouldn't assemble.
	#[error("TLS setup failed: {0}")]
	Tls(anyhow::Error),
}

impl InitErr
{
	/// Was this specifically a trust failure?  (That gets its own exit
	/// code.)
	pub(crate) fn is_bad_cert(&self) -> bool
	{
		matches!(self, InitErr::Probe(fetch::ProbeErr::BadCert))
	}
}


pub(crate) struct Engine
{
	pub(crate) config: Config,
	pub(crate) state: StateDir,

	/// Absent for offline operations (clean doesn't talk to anybody).
	fetcher: Option<Fetcher>,
}


impl Engine
{
	/// Stand up an operation: state dir, lock, and (if the operation
	/// needs the network) the trust probe and fetcher.
	pub(crate) fn init(config: Config, network: bool)
			-> Result<Self, InitErr>
	{
		let mut state = StateDir::init(config.state_dir())?;
		state.lock()?;

		let fetcher = match network {
			false => None,
			true => {
				let capath = fetch::probe_capath(&config)?;
				if let Some(cp) = &capath
				{ println!("Using fallback CA path {}", cp.display()); }
				let f = Fetcher::new(&config, capath.as_deref())
						.map_err(InitErr::Tls)?;
				Some(f)
			},
		};

		let ret = Engine { config, state, fetcher };
		Ok(ret)
	}


	/// Build an Engine around an existing state dir, no locks, no
	/// network.  Tests want this; nothing else should.
	#[cfg(test)]
	pub(crate) fn for_tests(config: Config, state: StateDir,
			fetcher: Option<Fetcher>) -> Self
	{
		Engine { config, state, fetcher }
	}


	/// The fetcher, which better exist if the operation thought it
	/// needed one.
	pub(crate) fn fetcher(&self) -> Result<&Fetcher, anyhow::Error>
	{
		self.fetcher.as_ref()
			.ok_or_else(|| anyhow::anyhow!("Error: fetcher should exist \
					for this operation"))
	}


	/// Bytes transferred so far, for telemetry.  Zero when offline,
	/// which is also correct.
	pub(crate) fn total_bytes(&self) -> u64
	{
		self.fetcher.as_ref().map(|f| f.total_bytes()).unwrap_or(0)
	}


	/// URL of a piece of content under a given version.
	pub(crate) fn content_url(&self, version: u32, leaf: &str)
			-> Result<Url, anyhow::Error>
	{
		let base = self.config.content_url.trim_end_matches('/');
		let mut url = Url::parse(&format!("{base}/{version}/{leaf}"))?;
		if let Some(p) = self.config.update_server_port
		{
			url.set_port(Some(p))
				.map_err(|_| anyhow::anyhow!("Can't set port on {url}"))?;
		}
		Ok(url)
	}

	pub(crate) fn path_prefix(&self) -> &Path
	{ self.config.path_prefix() }
}



#[cfg(test)]
mod tests
{
	use super::*;

	#[test]
	fn urls()
	{
		let td = tempfile::TempDir::new().unwrap();
		let mut cfg = Config::default();
		cfg.content_url = "https://example.org/update/".to_string();
		let state = StateDir::init(&td.path().join("st")).unwrap();
		let eng = Engine::for_tests(cfg, state, None);

		let u = eng.content_url(38420, "Manifest.MoM").unwrap();
		assert_eq!(u.as_str(),
				"https://example.org/update/38420/Manifest.MoM");

		// And no fetcher means asking for one is an error, not a panic
		assert!(eng.fetcher().is_err());
		assert_eq!(eng.total_bytes(), 0);
	}

	#[test]
	fn url_port_override()
	{
		let td = tempfile::TempDir::new().unwrap();
		let mut cfg = Config::default();
		cfg.content_url = "https://example.org/update".to_string();
		cfg.update_server_port = Some(8080);
		let state = StateDir::init(&td.path().join("st")).unwrap();
		let eng = Engine::for_tests(cfg, state, None);

		let u = eng.content_url(10, "files/abc").unwrap();
		assert_eq!(u.port(), Some(8080));
	}
}
