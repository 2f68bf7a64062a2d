//! #0 bundle-list
use crate::command::{CmdArg, UpdCmds, UpdCode};
use crate::engine::Engine;

pub(crate) fn run(carg: CmdArg) -> UpdCode
{
	let CmdArg { clargs, config } = carg;

	let args = match clargs.command {
		UpdCmds::BundleList(a) => a,
		_ => unreachable!("I'm a bundle-list, why does it think I'm not??"),
	};

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

	crate::bundle::list::run(&eng, &args)
}
