//! Filesystem-related funcs.
//!
//! This is mostly just some wrappers over low-level stuff we need that
//! isn't available in std, plus a couple recursive helpers.

use std::ffi::CString;
use std::fs;
use std::io;
use std::path::Path;


/// How much free space does the filesystem holding a path have, in
/// bytes?
///
/// We only use this for the install admission check, so the error
/// detail doesn't matter much; the caller treats "dunno" the same as
/// "not enough".
pub(crate) fn free_space(path: &Path) -> Result<u64, anyhow::Error>
{
	let fnbytes = path.as_os_str().as_encoded_bytes();
	let f = CString::new(fnbytes)?;

	let mut st: libc::statvfs;
	let errno = unsafe {
		use std::mem;
		st = mem::zeroed();
		match libc::statvfs(f.as_ptr(), &mut st) {
			0 => 0,
			_ => *libc::__errno_location(),
		}
	};

	if errno != 0
	{
		anyhow::bail!("statvfs({}): errno {errno}", path.display());
	}

	// f_bavail is what an unprivileged caller could use, which is the
	// honest number for "can the install fit".
	let free = (st.f_bsize as u64).saturating_mul(st.f_bavail as u64);
	Ok(free)
}


/// Flush everything to disk.  This is the big hammer after the rename
/// phase; per-file syncing would be both slower and weaker.
pub(crate) fn sync_fs()
{
	unsafe { libc::sync() };
}


/// Recursively delete a path, quietly tolerating it not existing.
pub(crate) fn rm_rf(path: &Path) -> Result<(), io::Error>
{
	let md = match fs::symlink_metadata(path) {
		Ok(md) => md,
		Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
		Err(e) => return Err(e),
	};

	match md.is_dir() {
		true  => fs::remove_dir_all(path),
		false => fs::remove_file(path),
	}
}


/// Recursively copy a directory tree.  Just files, dirs, and symlinks;
/// that's all the vendor tracking dir can contain anyway.
pub(crate) fn copy_all(src: &Path, dst: &Path) -> Result<(), io::Error>
{
	fs::create_dir_all(dst)?;
	for ent in fs::read_dir(src)?
	{
		let ent = ent?;
		let spath = ent.path();
		let dpath = dst.join(ent.file_name());
		let md = ent.metadata()?;

		if md.is_dir()
		{ copy_all(&spath, &dpath)?; }
		else if md.is_symlink()
		{
			let tgt = fs::read_link(&spath)?;
			std::os::unix::fs::symlink(&tgt, &dpath)?;
		}
		else
		{ fs::copy(&spath, &dpath)?; }
	}
	Ok(())
}


/// Empty out a directory without removing the directory itself.
pub(crate) fn clear_dir(dir: &Path) -> Result<(), io::Error>
{
	if !dir.is_dir() { return Ok(()); }
	for ent in fs::read_dir(dir)?
	{
		let ent = ent?;
		rm_rf(&ent.path())?;
	}
	Ok(())
}


/// Create an empty file (or truncate an existing one) with a given
/// mode.
pub(crate) fn touch_mode(path: &Path, mode: u32) -> Result<(), io::Error>
{
	use std::os::unix::fs::OpenOptionsExt;
	fs::OpenOptions::new()
		.write(true).create(true).truncate(false)
		.mode(mode)
		.open(path)?;
	Ok(())
}


/// Is a directory "populated"; i.e., does it exist and have anything in
/// it?  Used by the tracking store bootstrap.
pub(crate) fn is_populated_dir(dir: &Path) -> bool
{
	match fs::read_dir(dir) {
		Ok(mut rd) => rd.next().is_some(),
		Err(_) => false,
	}
}
