//! Bundle name aliases.
//!
//! An alias maps one requested name onto a list of real bundle names.
//! Definitions live in `alias.d` fragment files: one alias per line,
//! tab-separated, alias first then its bundles.  The vendor ships
//! defaults under /usr/share; the administrator's /etc fragments win
//! when both define the same alias.
//!
//! Expansion itself is a pure lookup: a name with no definition
//! expands to itself.

use std::collections::HashMap;
use std::path::Path;

use itertools::Itertools as _;


const VENDOR_ALIAS_D: &str = "/usr/share/defaults/swupd/alias.d";
const ETC_ALIAS_D: &str = "/etc/swupd/alias.d";


#[derive(Debug, Default)]
pub(crate) struct AliasDefs
{
	defs: HashMap<String, Vec<String>>,
}


impl AliasDefs
{
	/// Load alias definitions from a managed root.  Missing dirs and
	/// unreadable fragments just mean fewer aliases.
	pub(crate) fn load(path_prefix: &Path) -> AliasDefs
	{
		let mut ret = AliasDefs::default();

		// /etc parses second so it shadows the vendor defaults.
		for dir in [VENDOR_ALIAS_D, ETC_ALIAS_D]
		{
			let dir = crate::util::path_join(path_prefix, dir);
			let Ok(rd) = std::fs::read_dir(&dir) else { continue };

			// Fragment order matters for shadowing *within* a dir too,
			// so process sorted by name.
			let mut paths: Vec<_> = rd.filter_map(|e| e.ok())
					.map(|e| e.path()).collect();
			paths.sort();
			for p in paths
			{
				let Ok(text) = std::fs::read_to_string(&p) else { continue };
				ret.parse_fragment(&text);
			}
		}

		ret
	}

	fn parse_fragment(&mut self, text: &str)
	{
		for line in text.lines()
		{
			let line = line.trim_end();
			if line.is_empty() || line.starts_with('#') { continue; }

			let mut flds = line.split('\t');
			let Some(alias) = flds.next() else { continue };
			let bundles: Vec<String> = flds
					.filter(|b| !b.is_empty())
					.map(|b| b.to_string()).collect();
			if alias.is_empty() || bundles.is_empty() { continue; }

			self.defs.insert(alias.to_string(), bundles);
		}
	}


	/// Expand one requested name.  No definition means the name is its
	/// own expansion.
	pub(crate) fn expand(&self, name: &str) -> Vec<String>
	{
		match self.defs.get(name) {
			Some(bs) => bs.clone(),
			None => vec![name.to_string()],
		}
	}


	/// Expand a whole request, announcing any aliases that actually did
	/// something.
	pub(crate) fn expand_all(&self, names: &[String]) -> Vec<String>
	{
		let mut out = Vec::new();
		for name in names
		{
			let exp = self.expand(name);
			if exp.len() != 1 || &exp[0] != name
			{
				println!("Alias {name} will install bundle(s): {}",
						exp.iter().join(", "));
			}
			out.extend(exp);
		}
		out
	}
}
