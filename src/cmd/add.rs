//! #0 bundle-add
use crate::command::{CmdArg, UpdCmds, UpdCode};
use crate::engine::Engine;

pub(crate) fn run(carg: CmdArg) -> UpdCode
{
	// Split up
	let CmdArg { clargs, mut config } = carg;

	// Extract our own args
	let args = match clargs.command {
		UpdCmds::BundleAdd(a) => a,
		_ => unreachable!("I'm a bundle-add, why does it think I'm not??"),
	};

	if args.skip_diskspace_check { config.skip_diskspace_check = true; }

	let eng = match Engine::init(config, true) {
		Ok(e) => e,
		Err(e) => {
			eprintln!("Error: Failed updater initialization, exiting \
					now. ({e})");
			return match e.is_bad_cert() {
				true  => UpdCode::BadCert,
				false => UpdCode::UnexpectedCondition,
			};
		},
	};

	crate::bundle::add::run(&eng, &args.bundles)
}
