//! #0 bundle-remove
use crate::command::{CmdArg, UpdCmds, UpdCode};
use crate::engine::Engine;

pub(crate) fn run(carg: CmdArg) -> UpdCode
{
	let CmdArg { clargs, config } = carg;

	let args = match clargs.command {
		UpdCmds::BundleRemove(a) => a,
		_ => unreachable!("I'm a bundle-remove, why does it think I'm not??"),
	};

	// Removal still needs the network: the MoM and submanifests tell
	// us what's shared.
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

	crate::bundle::remove::run(&eng, &args.bundles)
}
