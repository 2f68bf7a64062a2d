//! Talking to the update server.
//!
//! This is a strictly synchronous, single-connection affair; one agent,
//! one transfer at a time, from the one thread an operation runs on.
//! The interesting parts are the retry loop and the trust-store
//! gymnastics, not concurrency.

/// Status taxonomy and retry strategies
mod status;
pub(crate) use status::{Status, Strategy, strategy};

use crate::config::Config;
use crate::util;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering::Relaxed};
use std::time::Duration;

use url::Url;


// Transport timeouts.  The connect side is a plain 30s.  The receive
// side stands in for a "1 byte/sec sustained over 120s" floor; we can't
// express a throughput floor through ureq, so a stalled transfer dies
// at the same 120s mark a fully-idle one would.
const CONNECT_TIMEOUT: u64 = 30;
const RCV_TIMEOUT: u64 = 120;


/// The retrying fetcher.  One of these exists per operation, hanging
/// off the engine context; everything swupd keeps in globals (the
/// handle, the byte counter, the latched CA path, the "server can't
/// resume" flag) lives here instead.
pub(crate) struct Fetcher
{
	/// The one agent.  ureq clones are shallow, but we never even need
	/// that; all use is sequential.
	agent: ureq::Agent,

	/// Retry policy, copied out of config at build time.
	max_retries: u32,
	retry_delay: u64,
	delay_multiplier: u64,
	max_delay: u64,

	/// Content served off local disk?  Changes retry strategy.
	local_content: bool,

	/// Latched when a server tells us it can't do ranges; from then on
	/// every download starts from zero.
	resume_disabled: AtomicBool,

	/// Total bytes transferred, for telemetry.
	total_bytes: AtomicU64,
}


/// What a failed download rolls up to, once the retry loop is done
/// with it.  Two flavors, matching the two ways swupd's loop gives up
/// (-EIO vs -ECOMM).
#[derive(Debug)]
#[derive(thiserror::Error)]
pub(crate) enum FetchErr
{
	/// Not worth retrying (404, 403, sink trouble, local content).
	#[error("Download failed ({0}), not retryable")]
	Failed(Status),

	/// Retried and retried and still no.
	#[error("Download failed ({0}), retries exhausted")]
	Exhausted(Status),
}


/// Problems setting up the connection in the first place, from the
/// init-time probe.
#[derive(Debug)]
#[derive(thiserror::Error)]
pub(crate) enum ProbeErr
{
	#[error("Server certificate verification failed")]
	BadCert,

	#[error("Communicating with server timed out")]
	Timeout,

	#[error("Failed to connect to update server: {0}")]
	Failed(String),
}


impl Fetcher
{
	/// Build up a fetcher.  `capath` is the CA directory latched by
	/// [`probe_capath`], if the default trust store didn't cut it.
	pub(crate) fn new(cfg: &Config, capath: Option<&Path>)
			-> Result<Self, anyhow::Error>
	{
		let tls = mk_tls(cfg, capath)?;
		let agent = mk_agent(tls);

		let ret = Fetcher {
			agent,
			max_retries: cfg.max_retries,
			retry_delay: cfg.retry_delay,
			delay_multiplier: cfg.delay_multiplier,
			max_delay: cfg.max_delay,
			local_content: cfg.content_url_is_local(),
			resume_disabled: AtomicBool::new(false),
			total_bytes: AtomicU64::new(0),
		};
		Ok(ret)
	}


	/// Total bytes we've moved so far.
	pub(crate) fn total_bytes(&self) -> u64
	{ self.total_bytes.load(Relaxed) }


	/// Download a URL to a file.  No resume; a partial from a previous
	/// life gets thrown away.
	pub(crate) fn get_file(&self, url: &Url, path: &Path)
			-> Result<(), FetchErr>
	{
		self.retry_loop(url, path, false)
	}


	/// Download a URL to a file, resuming a previous partial if the
	/// server plays along.
	pub(crate) fn get_file_resume(&self, url: &Url, path: &Path)
			-> Result<(), FetchErr>
	{
		self.retry_loop(url, path, true)
	}


	/// Download a URL into memory, with a capacity bound so a hostile
	/// or confused server can't balloon us.
	pub(crate) fn get_memory(&self, url: &Url, cap: usize)
			-> Result<Vec<u8>, FetchErr>
	{
		let mut buf = Vec::new();

		let mut current_retry = 0;
		let mut sleep_time = self.retry_delay;
		loop
		{
			buf.clear();
			let st = self.fetch_once_memory(url, &mut buf, cap);
			if st.is_completed() { return Ok(buf); }

			current_retry += 1;
			match self.retry_step(url, st, current_retry, &mut sleep_time)? {
				true  => continue,
				false => return Err(FetchErr::Exhausted(st)),
			}
		}
	}


	/*
	 * The retry loop.
	 */

	fn retry_loop(&self, url: &Url, path: &Path, resume_ok: bool)
			-> Result<(), FetchErr>
	{
		let mut current_retry = 0;
		let mut sleep_time = self.retry_delay;
		loop
		{
			let st = self.fetch_once_file(url, path, resume_ok);
			if st.is_completed() { return Ok(()); }

			current_retry += 1;
			match self.retry_step(url, st, current_retry, &mut sleep_time)? {
				true  => continue,
				false => return Err(FetchErr::Exhausted(st)),
			}
		}
	}


	/// One turn of the retry crank: classify, maybe sleep, say what
	/// we're doing.  Ok(true) means "go around again", Ok(false) means
	/// the retry budget ran dry.
	fn retry_step(&self, url: &Url, st: Status, current_retry: u32,
			sleep_time: &mut u64) -> Result<bool, FetchErr>
	{
		match strategy(st, self.local_content) {
			Strategy::NoRetry => return Err(FetchErr::Failed(st)),
			Strategy::RetryNow => *sleep_time = 0,
			Strategy::RetryWithDelay => (),
		}

		if self.max_retries > 0
		{
			if current_retry <= self.max_retries
			{
				if *sleep_time > 0
				{
					println!("Waiting {} seconds before retrying the \
							download", *sleep_time);
				}
				std::thread::sleep(Duration::from_secs(*sleep_time));
				*sleep_time = (*sleep_time * self.delay_multiplier)
						.min(self.max_delay);
				println!("Retry #{current_retry} downloading from {url}");
				return Ok(true);
			}
			eprintln!("Warning: Maximum number of retries reached");
		}
		else
		{
			println!("Download retries is disabled");
		}

		Ok(false)
	}


	/*
	 * Single transfer attempts.
	 */

	/// One attempt at a file download.
	fn fetch_once_file(&self, url: &Url, path: &Path, resume_ok: bool)
			-> Status
	{
		// file:// content skips the whole HTTP circus.
		if url.scheme() == "file"
		{ return self.fetch_local(url, path); }

		let resume = resume_ok && !self.resume_disabled.load(Relaxed);
		let start = match resume {
			true => fs::metadata(path).map(|md| md.len()).unwrap_or(0),
			false => 0,
		};

		let mut req = self.agent.request_url("GET", url);
		if start > 0
		{
			println!("Resuming download for '{url}'");
			req = req.set("Range", &format!("bytes={start}-"));
		}

		let status = match req.call() {
			Ok(resp) => self.file_body(resp, path, start),
			Err(e) => classify_err(e),
		};

		if status == Status::RangeError
		{
			// Server can't resume; nobody gets to resume anymore.
			eprintln!("Warning: Range not supported by server, download \
					resume disabled - '{url}'");
			self.resume_disabled.store(true, Relaxed);
		}

		// Keep partials only when the caller said resume was fair game.
		if !status.is_completed() && !resume_ok
		{
			let _ = fs::remove_file(path);
		}

		status
	}


	/// Drain a response body into the sink file.
	fn file_body(&self, resp: ureq::Response, path: &Path, start: u64)
			-> Status
	{
		let code = resp.status();

		// 206 is only legitimate when we asked for a range.
		if code == 206 && start == 0 { return Status::PartialFile; }

		// Appending continues a range reply; anything else (including a
		// server that ignored our Range and sent 200) starts over.
		let fh = match start > 0 && code == 206 {
			true  => fs::OpenOptions::new().append(true).open(path),
			false => fs::File::create(path),
		};
		let mut fh = match fh {
			Ok(f) => f,
			Err(_) => return Status::WriteError,
		};

		let mut body = resp.into_reader();
		match io::copy(&mut body, &mut fh) {
			Ok(n) => {
				self.total_bytes.fetch_add(n, Relaxed);
				Status::Completed
			},
			// Can't cleanly tell "server hung up" from "disk filled up"
			// here; transfer-level trouble is the common case.
			Err(_) => Status::Error,
		}
	}


	/// One attempt at a bounded in-memory download.
	fn fetch_once_memory(&self, url: &Url, buf: &mut Vec<u8>, cap: usize)
			-> Status
	{
		if url.scheme() == "file"
		{
			let Ok(path) = url.to_file_path() else { return Status::NotFound };
			return match fs::read(&path) {
				Ok(data) if data.len() > cap => Status::WriteError,
				Ok(data) => {
					self.total_bytes.fetch_add(data.len() as u64, Relaxed);
					*buf = data;
					Status::Completed
				},
				Err(e) if e.kind() == io::ErrorKind::NotFound
					=> Status::NotFound,
				Err(_) => Status::Error,
			};
		}

		let resp = match self.agent.request_url("GET", url).call() {
			Ok(r) => r,
			Err(e) => return classify_err(e),
		};

		use io::Read as _;
		let mut body = resp.into_reader().take(cap as u64 + 1);
		match body.read_to_end(buf) {
			Ok(_) if buf.len() > cap => Status::WriteError,
			Ok(n) => {
				self.total_bytes.fetch_add(n as u64, Relaxed);
				Status::Completed
			},
			Err(_) => Status::Error,
		}
	}


	/// "Download" off the local filesystem.
	fn fetch_local(&self, url: &Url, path: &Path) -> Status
	{
		let Ok(src) = url.to_file_path() else { return Status::NotFound };
		match fs::copy(&src, path) {
			Ok(n) => {
				self.total_bytes.fetch_add(n, Relaxed);
				Status::Completed
			},
			Err(e) if e.kind() == io::ErrorKind::NotFound
				=> Status::NotFound,
			Err(_) => Status::WriteError,
		}
	}
}


/// Boil a ureq error down to our status taxonomy.
fn classify_err(e: ureq::Error) -> Status
{
	match &e {
		ureq::Error::Status(code, _) => match *code {
			403 => Status::Forbidden,
			404 => Status::NotFound,
			416 => Status::RangeError,
			_   => Status::Error,
		},
		ureq::Error::Transport(t) => {
			// ureq doesn't give us a structured timeout, so sniff.
			let msg = t.to_string();
			match msg.contains("timed out") || msg.contains("timeout") {
				true  => Status::Timeout,
				false => Status::Error,
			}
		},
	}
}


/// Does this transport error smell like a certificate problem?  Used
/// by the init probe to decide whether trying other CA paths is worth
/// anything.
fn is_cert_err(e: &ureq::Error) -> bool
{
	match e {
		ureq::Error::Transport(t) => t.to_string().contains("certificate"),
		_ => false,
	}
}


/*
 * Init-time trust probing.
 */

/// Find a CA path that can actually verify the version server.
///
/// First try the default trust store.  If that falls over with a
/// certificate complaint, walk the configured fallback directories
/// until one of them works, and latch it for every later transfer.
/// A timeout is fatal right away; there's no point blaming the trust
/// store for a dead network.
pub(crate) fn probe_capath(cfg: &Config)
		-> Result<Option<PathBuf>, ProbeErr>
{
	let url = match Url::parse(&cfg.version_url) {
		Ok(mut u) => {
			if let Some(p) = cfg.update_server_port { let _ = u.set_port(Some(p)); }
			u
		},
		Err(e) => return Err(ProbeErr::Failed(e.to_string())),
	};

	// file:// version URLs don't need any of this.
	if url.scheme() == "file" { return Ok(None); }

	let first = match head_check(cfg, None, &url) {
		Ok(()) => return Ok(None),
		Err(HeadErr::Timeout) => return Err(ProbeErr::Timeout),
		Err(e) => e,
	};

	for dir in &cfg.fallback_capaths
	{
		if !dir.is_dir() { continue; }
		println!("Trying fallback CA path {}", dir.display());
		if head_check(cfg, Some(dir), &url).is_ok()
		{ return Ok(Some(dir.clone())); }
	}

	// Nothing worked; report the flavor of the original failure.
	match first {
		HeadErr::Cert => Err(ProbeErr::BadCert),
		e => Err(ProbeErr::Failed(e.into_msg())),
	}
}


/// What a probe HEAD can die of.
#[derive(Debug)]
enum HeadErr
{
	Cert,
	Timeout,
	Other(String),
}

impl HeadErr
{
	fn into_msg(self) -> String
	{
		match self {
			HeadErr::Cert => "certificate verification failed".to_string(),
			HeadErr::Timeout => "timed out".to_string(),
			HeadErr::Other(m) => m,
		}
	}
}


/// Issue a HEAD against the version endpoint with a given trust setup.
fn head_check(cfg: &Config, capath: Option<&Path>, url: &Url)
		-> Result<(), HeadErr>
{
	// Trust-store construction failing is as fatal as a verification
	// failure.
	let tls = mk_tls(cfg, capath)
			.map_err(|e| HeadErr::Other(e.to_string()))?;
	let agent = mk_agent(tls);

	match agent.request_url("HEAD", url).call() {
		Ok(_) => Ok(()),
		Err(e) if is_cert_err(&e) => Err(HeadErr::Cert),
		Err(e) => {
			let msg = e.to_string();
			match msg.contains("timed out") || msg.contains("timeout") {
				true  => Err(HeadErr::Timeout),
				false => Err(HeadErr::Other(msg)),
			}
		},
	}
}


/*
 * Building the TLS plumbing and agent.
 */

/// Put together the TLS connector: verification on, TLS >= 1.2, an
/// optional CA directory override, and an optional client identity
/// discovered by filesystem probe (absence is normal).
fn mk_tls(cfg: &Config, capath: Option<&Path>)
		-> Result<native_tls::TlsConnector, anyhow::Error>
{
	let mut bld = native_tls::TlsConnector::builder();
	bld.min_protocol_version(Some(native_tls::Protocol::Tlsv12));

	if let Some(dir) = capath
	{
		bld.disable_built_in_roots(true);
		for ent in fs::read_dir(dir)?
		{
			let ent = ent?;
			if !ent.file_type()?.is_file() { continue; }
			let pem = fs::read(ent.path())?;
			// Not everything in a CA dir need be a cert (hash
			// symlinks, READMEs); skip what doesn't parse.
			if let Ok(cert) = native_tls::Certificate::from_pem(&pem)
			{ bld.add_root_certificate(cert); }
		}
	}

	let ccert = util::path_join(cfg.path_prefix(), &cfg.client_cert);
	if ccert.is_file()
	{
		let pem = fs::read(&ccert)?;
		let ident = native_tls::Identity::from_pkcs8(&pem, &pem)?;
		bld.identity(ident);
	}

	Ok(bld.build()?)
}


/// Creating an Agent for our use.  Centralize to make later adjustments
/// a little easier...
fn mk_agent(tls: native_tls::TlsConnector) -> ureq::Agent
{
	ureq::AgentBuilder::new()
		.tls_connector(Arc::new(tls))
		.timeout_connect(Duration::from_secs(CONNECT_TIMEOUT))
		.timeout_read(Duration::from_secs(RCV_TIMEOUT))
		.user_agent(concat!("clear-rustpd/", env!("CARGO_PKG_VERSION")))
		.build()
}



#[cfg(test)]
mod tests
{
	use super::*;

	fn local_fetcher() -> Fetcher
	{
		let mut cfg = Config::default();
		cfg.content_url = "file:///nowhere".to_string();
		cfg.max_retries = 0;
		Fetcher::new(&cfg, None).unwrap()
	}

	#[test]
	fn local_roundtrip()
	{
		let td = tempfile::TempDir::new().unwrap();
		let src = td.path().join("blob");
		std::fs::write(&src, b"some file bits").unwrap();

		let f = local_fetcher();
		let url = Url::from_file_path(&src).unwrap();

		// To disk
		let dst = td.path().join("out");
		f.get_file(&url, &dst).unwrap();
		assert_eq!(std::fs::read(&dst).unwrap(), b"some file bits");

		// To memory
		let buf = f.get_memory(&url, 1024).unwrap();
		assert_eq!(buf, b"some file bits");

		// And we counted both transfers
		assert_eq!(f.total_bytes(), 2 * b"some file bits".len() as u64);
	}

	#[test]
	fn local_missing()
	{
		let td = tempfile::TempDir::new().unwrap();
		let f = local_fetcher();
		let url = Url::from_file_path(td.path().join("nope")).unwrap();

		let dst = td.path().join("out");
		let e = f.get_file(&url, &dst).unwrap_err();
		// Local content never retries
		assert!(matches!(e, FetchErr::Failed(_)));
	}

	#[test]
	fn memory_cap()
	{
		let td = tempfile::TempDir::new().unwrap();
		let src = td.path().join("big");
		std::fs::write(&src, vec![0u8; 100]).unwrap();

		let f = local_fetcher();
		let url = Url::from_file_path(&src).unwrap();
		let e = f.get_memory(&url, 10).unwrap_err();
		assert!(matches!(e,
				FetchErr::Failed(Status::WriteError)));
	}
}
