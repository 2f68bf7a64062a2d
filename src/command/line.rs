//! Command line handling
//!
//! General invocation:
//! $0 [options] <command> [command-opts]

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;


/// Main arg entry point
#[derive(Debug)]
#[derive(Parser)]
#[command(about = "Manage the bundles on your Clear Linux style system.")]
#[command(version)]
pub struct UpdArgs
{
	#[command(subcommand)]
	pub(crate) command: UpdCmds,

	/// Server URL for both version and content.
	///
	/// Normally both halves come from the same server, so this sets
	/// them together.  Mirrors that split them can use the specific
	/// options instead.
	#[arg(short, long)]
	pub(crate) url: Option<String>,

	/// Content server URL (manifests, fullfiles, packs).
	#[arg(long)]
	pub(crate) contenturl: Option<String>,

	/// Version server URL.
	#[arg(long)]
	pub(crate) versionurl: Option<String>,

	/// Port override for the update server.
	#[arg(short = 'P', long)]
	pub(crate) port: Option<u16>,

	/// Operate on a system mounted at a given path.
	///
	/// By default we operate on `/`, the system you're running on.
	/// Point this at a mounted image or chroot to manage that instead.
	#[arg(short, long)]
	pub(crate) path: Option<PathBuf>,

	/// Use a different state directory.
	#[arg(short = 'S', long)]
	pub(crate) statedir: Option<PathBuf>,

	/// Do not verify the MoM signature.
	///
	/// For people running unsigned mirrors of their own.
	#[arg(short = 'n', long)]
	pub(crate) nosigcheck: bool,
}


/// Individual subcommands and their args
#[derive(Debug)]
#[derive(Subcommand)]
pub(crate) enum UpdCmds
{
	/// Install new bundles.
	///
	/// Resolves the requested bundles (and everything they include)
	/// against the current version's manifests, downloads what's
	/// missing, and applies the files to the system.  Already-installed
	/// bundles are reported and skipped.
	BundleAdd(CmdAdd),

	/// Uninstall bundles.
	///
	/// Removes files owned exclusively by the named bundles.  A bundle
	/// some other installed bundle depends on can't be removed; you'll
	/// be shown the dependency tree instead.
	BundleRemove(CmdRemove),

	/// List installed (or installable) bundles.
	BundleList(CmdList),

	/// Remove cached content used for updates from state directory.
	Clean(CmdClean),
}


#[derive(Debug)]
#[derive(Args)]
pub(crate) struct CmdAdd
{
	/// Bundle(s) to install
	#[arg(required = true)]
	pub(crate) bundles: Vec<String>,

	/// Skip the free-space check before installing.
	#[arg(long)]
	pub(crate) skip_diskspace_check: bool,
}


#[derive(Debug)]
#[derive(Args)]
pub(crate) struct CmdRemove
{
	/// Bundle(s) to remove
	#[arg(required = true)]
	pub(crate) bundles: Vec<String>,
}


#[derive(Debug)]
#[derive(Args)]
pub(crate) struct CmdList
{
	/// List all installable bundles instead of installed ones.  With
	/// --has-dep, consider all installable bundles as requirers.
	#[arg(long)]
	pub(crate) all: bool,

	/// Show the bundles a given bundle includes, transitively.
	#[arg(long, value_name = "BUNDLE")]
	pub(crate) deps: Option<String>,

	/// Show the bundles that require a given bundle.
	#[arg(long = "has-dep", value_name = "BUNDLE")]
	pub(crate) has_dep: Option<String>,
}


#[derive(Debug)]
#[derive(Args)]
pub(crate) struct CmdClean
{
	/// Remove all the content including recent metadata
	#[arg(long)]
	pub(crate) all: bool,

	/// Just print files that would be removed
	#[arg(long)]
	pub(crate) dry_run: bool,
}


/// Parse the command line.  Errors (and --help/--version) come back to
/// the caller rather than exiting here, so main can pick the exit code.
pub fn parse() -> Result<UpdArgs, clap::Error>
{
	UpdArgs::try_parse()
}
