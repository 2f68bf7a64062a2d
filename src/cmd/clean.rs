//! #0 clean
use crate::command::{CmdArg, UpdCmds, UpdCode};
use crate::engine::Engine;
use crate::statedir;

pub(crate) fn run(carg: CmdArg) -> UpdCode
{
	let CmdArg { clargs, config } = carg;

	// Extract our own args
	let args = match clargs.command {
		UpdCmds::Clean(a) => a,
		_ => unreachable!("I'm a clean, why does it think I'm not??"),
	};

	// No network for cleaning; just the state dir and its lock.
	let eng = match Engine::init(config, false) {
		Ok(e) => e,
		Err(e) => {
			eprintln!("Error: Failed updater initialization, exiting \
					now. ({e})");
			return UpdCode::UnexpectedCondition;
		},
	};

	// Retention decisions are wall-clock-relative; refuse to guess
	// with a clock from before the epoch.
	if !args.all
	{
		use std::time::{SystemTime, UNIX_EPOCH};
		if SystemTime::now().duration_since(UNIX_EPOCH).is_err()
		{
			eprintln!("Error: couldn't read current time to decide \
					what files to clean");
			return UpdCode::TimeUnknown;
		}
	}

	// Without --all, the current version's manifests survive; find out
	// what "current" is and what its MoM says.  All best-effort.
	let mom_contents = match args.all {
		true => None,
		false => {
			match crate::version::get_current_version(eng.path_prefix()) {
				Err(_) => {
					eprintln!("Warning: Unable to determine current OS \
							version");
					None
				},
				Ok(v) => std::fs::read_to_string(
						eng.state.manifest_path(v, "Manifest.MoM")).ok(),
			}
		},
	};

	let ret = statedir::clean_statedir(&eng.state, args.dry_run,
			args.all, mom_contents.as_deref());
	match ret {
		Ok(n) => {
			match args.dry_run {
				true  => println!("Would remove {n} files."),
				false => println!("{n} files removed."),
			}
			UpdCode::Ok
		},
		Err(e) => {
			eprintln!("Error: {e}");
			UpdCode::CouldntListDir
		},
	}
}
