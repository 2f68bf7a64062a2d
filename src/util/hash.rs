//! Misc (SHA256) hashing utils
use std::ops::Deref;
use std::fmt;
use serde_with::{serde_as, hex::Hex};


/// A raw SHA256 content hash.
///
/// SHA256 gives you a 256 bit number, which you need 256 bits to store.
/// Or more, depending on how you store it, but if you wanna be simple,
/// it's just 256 bits.  Or 32 octets.  The sha2 crate hands back a
/// [u8; 32], and the base16 crate can deal with that, so we just wrap
/// that and call it good.  Serializing goes through hex, so anything
/// we write out matches the wire form.
///
/// Everything on the wire and in the state dir uses the 64-char hex
/// form; see [`HashBuf`] for that.
#[derive(Default, Copy, Clone, Hash, PartialEq, Eq, PartialOrd, Ord)]
#[serde_as]
#[derive(serde::Serialize, serde::Deserialize)]
pub(crate) struct Hash256(
	#[serde_as(as = "Hex")]
	[u8; 32]
);

impl Deref for Hash256
{
	type Target = [u8; 32];
	fn deref(&self) -> &Self::Target { &self.0 }
}

impl fmt::Debug for Hash256
{
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result
	{ write!(f, "Hash256({})", self.to_buf().as_ref()) }
}

impl std::str::FromStr for Hash256
{
	type Err = anyhow::Error;

	fn from_str(s: &str) -> Result<Self, Self::Err>
	{
		use anyhow::anyhow;

		// First check the length; that's easy
		let xlen = 64;
		let slen = s.len();
		if slen != xlen
		{
			let estr = anyhow!("Invalid hash length: {slen} should be \
					{xlen} for '{s}'");
			Err(estr)?;
		}

		// And dehexify
		let mut hout = Hash256::default();
		let hret = base16ct::lower::decode(&s, &mut hout.0)
				.map_err(|e| anyhow!("Invalid hex parsing: {e} trying '{s}'"))?;

		// Double-checking the len here, in case I made a booboo.
		assert_eq!(hret.len(), hout.len(), "should have gotten the hex len right");

		Ok(hout)
	}
}

impl From<[u8; 32]> for Hash256
{
	fn from(buf: [u8; 32]) -> Self
	{
		Self(buf)
	}
}

impl fmt::Display for Hash256
{
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result
	{
		let hb: HashBuf = self.to_buf();
		write!(f, "{}", hb)
	}
}

impl Hash256
{
	pub(crate) fn to_buf(&self) -> HashBuf { (*self).into() }
}



/// A hex SHA256 output.
///
/// A base16 encoding of a number is inherently valid UTF-8, so trivially
/// String-able too.  But since we know the size, we go with a more
/// fixed-size allocation type for simplicity, when we don't need a
/// str-ified version.  Fullfiles in the staged/ dir are named by exactly
/// this, so its length is load-bearing for the janitor.
#[derive(Copy, Clone, Hash, PartialEq, Eq, PartialOrd, Ord)]
#[serde_as]
#[derive(serde::Serialize, serde::Deserialize)]
pub(crate) struct HashBuf(
	#[serde_as(as = "Hex")]
	[u8; 64]
);

/// The hex hash length.  Staged fullfiles have names of exactly this
/// many characters.
pub(crate) const HASH_HEX_LEN: usize = 64;

impl Deref for HashBuf
{
	type Target = [u8; 64];
	fn deref(&self) -> &Self::Target { &self.0 }
}

impl Default for HashBuf
{
	// Can't just derive for 64-size arrays, until the Glorious Future of
	// some combination of const generics and specialization and
	// whatnot...
	fn default() -> Self { Self ( [0; 64] ) }
}

impl From<Hash256> for HashBuf
{
	fn from(hash: Hash256) -> Self
	{
		let mut buf = Self::default();
		let bret = base16ct::lower::encode(&hash.0, &mut buf.0)
				.map_err(|e| format!("Hash encoding error: {}", e))
				.unwrap();

		// Double check that somebody doesn't screw up the length.
		let slen = bret.len();
		let blen = buf.len();
		if slen != blen
		{
			panic!("Programmer screwed up buffer size: should have \
					{blen} but got {slen} encoded");
		}

		// 'zit
		buf
	}
}

impl AsRef<str> for HashBuf
{
	/// Should be impossible to create these other than via our
	/// constructors, so should be guaranteed already UTF-8-y.
	fn as_ref(&self) -> &str
	{
		std::str::from_utf8(&self.0).expect("base16 encode screwed us")
	}
}

impl fmt::Display for HashBuf
{
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result
	{ write!(f, "{}", self.as_ref()) }
}

impl fmt::Debug for HashBuf
{
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result
	{ write!(f, "HashBuf({})", self.as_ref()) }
}



/*
 * Now some of the hashing utils, using those structs
 */


/// Calculate the SHA256 of something we can read from (like a
/// filehandle, or a decompress stream, or whatever).
pub(crate) fn sha256_reader<T: std::io::Read>(rdr: &mut T)
		-> Result<Hash256, std::io::Error>
{
	use sha2::{Sha256, Digest};

	let mut hasher = Sha256::new();
	std::io::copy(rdr, &mut hasher)?;
	let khash = hasher.finalize();
	let khash = Hash256(khash.into());
	Ok(khash)
}


/// Calculate the SHA256 of a file
pub(crate) fn sha256_file(file: &std::path::Path)
		-> Result<Hash256, std::io::Error>
{
	let mut fh = std::fs::File::open(file)?;
	sha256_reader(&mut fh)
}


/// Calculate the SHA256 of a buffer
pub(crate) fn sha256_buf(buf: &[u8]) -> Hash256
{
	use sha2::{Sha256, Digest};
	let khash = Sha256::digest(buf);
	Hash256(khash.into())
}


/// Check the SHA256 hash of a buffer against an expected result.
pub(crate) fn check_sha256(buf: &[u8], expect: &Hash256, name: &str)
		-> Result<(), anyhow::Error>
{
	let khash = sha256_buf(buf);
	if &khash != expect
	{
		use anyhow::anyhow;
		let es = anyhow!("Bad {name} hash: expected '{expect}', got '{khash}'");
		return Err(es);
	}

	Ok(())
}



#[cfg(test)]
mod tests
{
	use super::*;

	fn start_at_the_beginning() -> &'static str
	{ "Do, a deer, a female deer" }
	fn expect_at_the_beginning() -> &'static str
	{ "762e31fc5d92b2c6d7e5a9485cab35714f5e27457e252d0126663554280099fe" }

	#[test]
	fn sha256()
	{
		let buf = start_at_the_beginning().as_bytes();
		let expect: Hash256 = expect_at_the_beginning().parse().unwrap();
		check_sha256(buf, &expect, "Julie Andrews").unwrap();
	}

	#[test]
	fn roundtrip()
	{
		let h: Hash256 = expect_at_the_beginning().parse().unwrap();
		let hb = h.to_buf();
		assert_eq!(hb.as_ref(), expect_at_the_beginning());
		assert_eq!(hb.as_ref().len(), HASH_HEX_LEN);
	}

	#[test]
	fn badlen()
	{
		let e = "beef".parse::<Hash256>().unwrap_err();
		assert!(e.to_string().contains("Invalid hash length"));
	}

	#[test]
	fn serde_is_hex()
	{
		let h: Hash256 = expect_at_the_beginning().parse().unwrap();

		// Out as the wire form...
		let json = serde_json::to_string(&h).unwrap();
		assert_eq!(json, format!("\"{}\"", expect_at_the_beginning()));

		// ...and back.
		let back: Hash256 = serde_json::from_str(&json).unwrap();
		assert_eq!(back, h);
	}
}
