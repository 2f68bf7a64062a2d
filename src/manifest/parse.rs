//! Full parse of a manifest file.
//!
//! The wire format is line-oriented text: a handful of tab-separated
//! header fields, a blank line, then one line per file.  File lines are
//! `<flags>\t<hash>\t<version>\t<path>` where flags is a fixed four
//! character field.

use std::path::PathBuf;

use super::{Manifest, File, FileType};

use anyhow::anyhow;
use anyhow::Error as AError;


/// Error from parsing a manifest blob
#[derive(Debug)]
#[derive(thiserror::Error)]
pub(crate) enum ParseErr
{
	#[error("Manifest isn't text: {0}")]
	Utf8(#[from] std::str::Utf8Error),

	#[error("Bad manifest header: {0}")]
	Header(String),

	#[error("Manifest line {0}: {1}")]
	Line(usize, AError),

	#[error("Duplicate path in manifest: {0}")]
	DupPath(PathBuf),
}


/// Parse a manifest out of raw bytes.
///
/// The component name isn't in the file itself; it comes from how we
/// found the file (the MoM entry, or the "MoM" sentinel), so the caller
/// supplies it.
pub(crate) fn parse(bytes: &[u8], component: &str)
		-> Result<Manifest, ParseErr>
{
	let text = std::str::from_utf8(bytes)?;

	let mut mf = Manifest::default();
	mf.component = component.to_string();

	let mut lines = text.lines().enumerate();

	// First line pins the format.
	match lines.next() {
		Some((_, l)) if l.starts_with("MANIFEST\t") => {
			let fstr = &l["MANIFEST\t".len()..];
			mf.format = fstr.parse().map_err(|_|
					ParseErr::Header(format!("bad format '{fstr}'")))?;
		},
		Some((_, l)) =>
			return Err(ParseErr::Header(format!("expected MANIFEST, got '{l}'"))),
		None =>
			return Err(ParseErr::Header("empty manifest".to_string())),
	}

	// Header fields until the blank separator.  Fields we don't consume
	// (previous, filecount, timestamp...) are skipped, not errors;
	// servers grow new ones.
	for (lnum, l) in &mut lines
	{
		if l.is_empty() { break; }

		let Some((key, val)) = l.split_once('\t') else {
			return Err(ParseErr::Line(lnum + 1,
					anyhow!("header line without a tab: '{l}'")));
		};
		let val = val.trim();
		match key {
			"version:" => {
				mf.version = val.parse().map_err(|_|
						ParseErr::Line(lnum + 1, anyhow!("bad version '{val}'")))?;
			},
			"contentsize:" => {
				mf.contentsize = val.parse().map_err(|_|
						ParseErr::Line(lnum + 1, anyhow!("bad contentsize '{val}'")))?;
			},
			"includes:" => mf.includes.push(val.to_string()),
			_ => (),
		}
	}

	// And the file lines.
	for (lnum, l) in lines
	{
		if l.is_empty() { continue; }
		let f = parse_file_line(l)
				.map_err(|e| ParseErr::Line(lnum + 1, e))?;
		mf.files.push(f);
	}

	// The on-disk order is supposed to already be path-sorted, but
	// nothing downstream survives it not being true, so make it true.
	mf.files.sort_by(|a, b| a.path.cmp(&b.path));
	for w in mf.files.windows(2)
	{
		if w[0].path == w[1].path
		{ return Err(ParseErr::DupPath(w[0].path.clone())); }
	}

	Ok(mf)
}


/// One `<flags>\t<hash>\t<version>\t<path>` line.
fn parse_file_line(l: &str) -> Result<File, AError>
{
	let mut flds = l.split('\t');

	let flags = flds.next().ok_or_else(|| anyhow!("no flags field"))?;
	let hash = flds.next().ok_or_else(|| anyhow!("no hash field"))?;
	let vers = flds.next().ok_or_else(|| anyhow!("no version field"))?;
	// Paths can contain tabs in theory; glue any remainder back on.
	let path = match flds.next() {
		Some(p) => flds.fold(p.to_string(), |acc, x| acc + "\t" + x),
		None => Err(anyhow!("no path field"))?,
	};

	let hash = hash.parse()
			.map_err(|e| anyhow!("bad hash: {e}"))?;
	let last_change: u32 = vers.parse()
			.map_err(|_| anyhow!("bad version '{vers}'"))?;

	// Flags are four chars: type, deletion, modifier, misc.
	let fb = flags.as_bytes();
	if fb.len() != 4
	{ Err(anyhow!("flags field '{flags}' should be 4 chars"))?; }

	let ftype = match fb[0] {
		b'F' => FileType::Regular,
		b'D' => FileType::Directory,
		b'L' => FileType::Symlink,
		b'M' => FileType::Manifest,
		b'.' => FileType::Deleted,
		x => Err(anyhow!("unknown type flag '{}'", x as char))?,
	};
	// Deleted and ghosted both tombstone the path, whatever the type
	// column claims.
	let ftype = match fb[1] {
		b'd' | b'g' => FileType::Deleted,
		_ => ftype,
	};

	// Config files stay put on installs; state and boot files aren't
	// ours to touch at all.
	let do_not_update = fb[2] == b'C';
	let ignored = fb[2] == b's' || fb[2] == b'b';

	let experimental = fb[3] == b'x';

	let ret = File {
		path: PathBuf::from(path),
		hash,
		ftype,
		last_change,
		experimental,
		do_not_update,
		ignored,
		staging: None,
	};
	Ok(ret)
}



#[cfg(test)]
pub(crate) mod tests
{
	use super::*;

	// A couple hashes to play with; value is irrelevant, shape isn't.
	pub(crate) const H1: &str =
		"1111111111111111111111111111111111111111111111111111111111111111";
	pub(crate) const H2: &str =
		"2222222222222222222222222222222222222222222222222222222222222222";

	pub(crate) fn mini_mom() -> String
	{
		format!("MANIFEST\t31\n\
			version:\t20\n\
			previous:\t10\n\
			filecount:\t2\n\
			timestamp:\t1700000000\n\
			contentsize:\t0\n\
			\n\
			M...\t{H1}\t20\tos-core\n\
			M..x\t{H2}\t10\teditors\n")
	}

	pub(crate) fn mini_bundle() -> String
	{
		format!("MANIFEST\t31\n\
			version:\t20\n\
			contentsize:\t4096\n\
			includes:\tos-core\n\
			\n\
			D...\t{H1}\t10\t/usr/share/vim\n\
			F...\t{H2}\t20\t/usr/bin/vim\n\
			.d..\t{H1}\t20\t/usr/bin/oldvim\n\
			L...\t{H1}\t10\t/usr/bin/vi\n")
	}

	#[test]
	fn mom()
	{
		let m = parse(mini_mom().as_bytes(), "MoM").unwrap();
		assert_eq!(m.component, "MoM");
		assert_eq!(m.format, 31);
		assert_eq!(m.version, 20);
		assert_eq!(m.files.len(), 2);

		let ed = m.search_bundle("editors").unwrap();
		assert_eq!(ed.last_change, 10);
		assert!(ed.experimental);
		assert_eq!(ed.printable_name(), "editors (experimental)");

		let core = m.search_bundle("os-core").unwrap();
		assert!(!core.experimental);
		assert!(m.search_bundle("no-such").is_none());
	}

	#[test]
	fn bundle()
	{
		let m = parse(mini_bundle().as_bytes(), "editors").unwrap();
		assert_eq!(m.includes, vec!["os-core"]);
		assert_eq!(m.contentsize, 4096);

		// Files come out sorted by path regardless of input order
		let paths: Vec<_> = m.files.iter()
				.map(|f| f.path.to_string_lossy().into_owned()).collect();
		let mut sorted = paths.clone();
		sorted.sort();
		assert_eq!(paths, sorted);

		use std::path::Path;
		let vim = m.search_file(Path::new("/usr/bin/vim")).unwrap();
		assert_eq!(vim.ftype, FileType::Regular);
		assert_eq!(vim.last_change, 20);

		let old = m.search_file(Path::new("/usr/bin/oldvim")).unwrap();
		assert!(old.is_deleted());

		let vi = m.search_file(Path::new("/usr/bin/vi")).unwrap();
		assert_eq!(vi.ftype, FileType::Symlink);
	}

	#[test]
	fn flag_modifiers()
	{
		let text = format!("MANIFEST\t31\nversion:\t5\n\n\
				F.C.\t{H1}\t5\t/etc/motd\n\
				F.s.\t{H1}\t5\t/var/lib/thing\n\
				F.b.\t{H2}\t5\t/usr/lib/kernel/img\n");
		let m = parse(text.as_bytes(), "x").unwrap();

		use std::path::Path;
		assert!(m.search_file(Path::new("/etc/motd")).unwrap().do_not_update);
		assert!(m.search_file(Path::new("/var/lib/thing")).unwrap().ignored);
		assert!(m.search_file(Path::new("/usr/lib/kernel/img")).unwrap().ignored);
	}

	#[test]
	fn dup_path_refused()
	{
		let text = format!("MANIFEST\t31\nversion:\t5\n\n\
				F...\t{H1}\t5\t/usr/bin/x\n\
				F...\t{H2}\t5\t/usr/bin/x\n");
		let e = parse(text.as_bytes(), "x").unwrap_err();
		assert!(matches!(e, ParseErr::DupPath(_)));
	}

	#[test]
	fn garbage_refused()
	{
		assert!(parse(b"", "x").is_err());
		assert!(parse(b"nonsense\n", "x").is_err());
		let text = format!("MANIFEST\t31\nversion:\t5\n\n\
				Q...\t{H1}\t5\t/usr/bin/x\n");
		assert!(matches!(parse(text.as_bytes(), "x").unwrap_err(),
				ParseErr::Line(4, _)));
	}
}
