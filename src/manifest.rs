//! Manifests: the server's description of what the OS is made of.
//!
//! One Manifest-of-Manifests (MoM) per published version lists every
//! bundle manifest; each bundle manifest lists its files and the other
//! bundles it includes.  This module owns the in-memory structs, the
//! text parser, the MoM signature check, and the include-graph
//! operations built on top.

/// The structs
mod structs;
pub(crate) use structs::{Manifest, File, FileType};

/// The text parser
mod parse;
pub(crate) use parse::parse;

/// MoM signature verification
mod sig;

/// Include-graph operations: loading, recursion, consolidation
mod graph;
pub(crate) use graph::Sub;
pub(crate) use graph::{load_mom, load_manifest, add_subscriptions,
		set_subscription_versions, recurse_manifest};
pub(crate) use graph::{consolidate_files, filter_out_deleted,
		filter_out_existing, required_by};


/// The component name of the manifest of manifests itself.
pub(crate) const MOM_COMPONENT: &str = "MoM";

/// The base bundle every system has; never removable.
pub(crate) const CORE_BUNDLE: &str = "os-core";
