//! Post-update hooks.
//!
//! After files land, the system wants a nudge: the loader cache is
//! stale at minimum.  None of this is allowed to fail the install; a
//! hook that errors gets a warning and life goes on.  A repair pass can
//! always re-run them.

use crate::engine::Engine;


/// Run the vendor post-update hooks.  Only meaningful on the live
/// root; for an offset root (image builds etc) the caller is expected
/// to run triggers in a chroot of their own, so we skip.
pub(crate) fn run_post_update(eng: &Engine)
{
	if eng.path_prefix() != std::path::Path::new("/")
	{
		println!("Post-update hooks skipped for offset root {}",
				eng.path_prefix().display());
		return;
	}

	run_one("/usr/bin/ldconfig", &[]);
}


fn run_one(prog: &str, args: &[&str])
{
	use std::process::Command;

	let ret = Command::new(prog).args(args).status();
	match ret {
		Ok(st) if st.success() => (),
		Ok(st) => eprintln!("Warning: post-update hook {prog} exited {st}"),
		Err(e) => eprintln!("Warning: couldn't run post-update hook \
				{prog}: {e}"),
	}
}
