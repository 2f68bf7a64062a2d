use std::process::ExitCode;

use clear_rustpd::command;
use clear_rustpd::command::UpdCode;

fn main() -> ExitCode
{
	let clargs = match command::parse() {
		Ok(a) => a,
		Err(e) => {
			// --help and --version land here too, and they're not
			// errors.
			let _ = e.print();
			return match e.use_stderr() {
				false => ExitCode::SUCCESS,
				true  => UpdCode::InvalidOption.into(),
			};
		},
	};

	command::run(clargs)
}
