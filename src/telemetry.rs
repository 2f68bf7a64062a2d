//! Telemetry record spool.
//!
//! We only produce records; shipping them anywhere is some other
//! daemon's business.  Records are JSON files dropped (best-effort,
//! never fatally) under the state dir for a transport to sweep up.

use crate::statedir::StateDir;


/// Severity class of a record.
#[derive(Debug, Copy, Clone)]
#[derive(serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum Class
{
	Info,
	Crit,
}


/// One operation's worth of telemetry.
#[derive(Debug)]
#[derive(serde::Serialize)]
pub(crate) struct Record
{
	pub(crate) class: Class,

	/// Event name ("bundleadd", "bundleremove").
	pub(crate) event: &'static str,

	/// Which bundle(s) the operation was about.
	pub(crate) bundle: String,

	pub(crate) current_version: u32,

	/// The exit-code-shaped result.
	pub(crate) result: u8,

	/// Bytes transferred over the operation.
	pub(crate) bytes: u64,

	pub(crate) timestamp: String,
}


/// Spool a record.  Failures get a note on stderr and are otherwise
/// none of the operation's business.
pub(crate) fn record(state: &StateDir, mut rec: Record)
{
	let now = chrono::Utc::now();
	rec.timestamp = now.to_rfc3339();

	let leaf = format!("{}.{}.json", rec.event, now.timestamp_millis());
	let path = state.telemetry().join(leaf);

	let ret = serde_json::to_string(&rec)
			.map_err(std::io::Error::other)
			.and_then(|json| std::fs::write(&path, json));
	if let Err(e) = ret
	{
		eprintln!("Warning: couldn't spool telemetry record: {e}");
	}
}



#[cfg(test)]
mod tests
{
	use super::*;

	#[test]
	fn spooling()
	{
		let td = tempfile::TempDir::new().unwrap();
		let sd = StateDir::init(&td.path().join("st")).unwrap();

		let rec = Record {
			class: Class::Info,
			event: "bundleadd",
			bundle: "editors".to_string(),
			current_version: 20,
			result: 0,
			bytes: 12345,
			timestamp: String::new(),
		};
		record(&sd, rec);

		let ents: Vec<_> = std::fs::read_dir(sd.telemetry()).unwrap()
				.filter_map(|e| e.ok()).collect();
		assert_eq!(ents.len(), 1);
		let text = std::fs::read_to_string(ents[0].path()).unwrap();
		let v: serde_json::Value = serde_json::from_str(&text).unwrap();
		assert_eq!(v["event"], "bundleadd");
		assert_eq!(v["class"], "info");
		assert_eq!(v["bytes"], 12345);
		assert!(!v["timestamp"].as_str().unwrap().is_empty());
	}
}
