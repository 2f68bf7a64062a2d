//! Misc util funcs

/// SHA256 hashing utils
pub(crate) mod hash;

/// Filesystem stuff (free space, recursive ops, sync)
pub(crate) mod fs;



use std::path::{Path, PathBuf};

/// Append paths.
///
/// It's not trivial to just use Path::join() because it treats join'ing
/// an "absolute" path as _replacing_ the base, not appending to.
/// Presumably there are usecases where that's the sensible behavior.
/// For us, though, it pretty much never is; manifest paths are always
/// absolute and the path prefix is a sort of "chroot".  So to avoid
/// repeating ourselves too often, just make a util func for it.
pub(crate) fn path_join(base: impl AsRef<Path>, sub: impl AsRef<Path>)
		-> PathBuf
{
	// So for our subpath, strip off the leading absoluteness if it has
	// it.
	let sub = match sub.as_ref().strip_prefix("/") {
		Ok(x) => x,
		Err(_) => sub.as_ref(),
	};
	// Then .join will do what we want.
	base.as_ref().join(sub)
}


/// Pluralize for a number
pub(crate) fn plural(n: usize) -> &'static str
{
	if n == 1 { "" } else { "s" }
}



#[cfg(test)]
mod tests
{
	use super::*;

	#[test]
	fn joining()
	{
		let base = Path::new("/mnt/target");
		assert_eq!(path_join(base, "/usr/bin/vim"),
				PathBuf::from("/mnt/target/usr/bin/vim"));
		assert_eq!(path_join(base, "relative/ish"),
				PathBuf::from("/mnt/target/relative/ish"));
	}

	#[test]
	fn plurals()
	{
		assert_eq!(plural(1), "");
		assert_eq!(plural(0), "s");
		assert_eq!(plural(42), "s");
	}
}
