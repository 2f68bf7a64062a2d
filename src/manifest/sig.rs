//! MoM signature verification.
//!
//! The server publishes `Manifest.MoM.sig` beside the MoM: a detached
//! PKCS7 signature chaining to a root certificate shipped on the OS.
//! Submanifests don't get their own signatures; their integrity comes
//! from the hash in the (signed) MoM.

use std::path::Path;

use openssl::pkcs7::{Pkcs7, Pkcs7Flags};
use openssl::stack::Stack;
use openssl::x509::X509;
use openssl::x509::store::X509StoreBuilder;


/// Verify a detached signature over the MoM bytes against the pinned
/// root certificate.
pub(crate) fn verify_mom(cert_path: &Path, mom: &[u8], sig: &[u8])
		-> Result<(), anyhow::Error>
{
	let certpem = std::fs::read(cert_path)
			.map_err(|e| anyhow::anyhow!("Can't read root cert {}: {e}",
					cert_path.display()))?;
	let cert = X509::from_pem(&certpem)?;

	let mut store = X509StoreBuilder::new()?;
	store.add_cert(cert.clone())?;
	let store = store.build();

	// Signatures come DER off the server, but self-built mixes tend to
	// produce PEM, so take either.
	let p7 = Pkcs7::from_der(sig).or_else(|_| Pkcs7::from_pem(sig))?;

	let mut signers = Stack::new()?;
	signers.push(cert)?;

	// NOINTERN: only trust the pinned cert as a signer, not whatever
	// certs ride along inside the blob.
	let flags = Pkcs7Flags::BINARY | Pkcs7Flags::NOINTERN;
	p7.verify(&signers, &store, Some(mom), None, flags)
			.map_err(|e| anyhow::anyhow!("Signature verification failed: {e}"))?;

	Ok(())
}



#[cfg(test)]
mod tests
{
	use super::*;

	#[test]
	fn missing_cert()
	{
		let td = tempfile::TempDir::new().unwrap();
		let nocert = td.path().join("nope.pem");
		let e = verify_mom(&nocert, b"mom", b"sig").unwrap_err();
		assert!(e.to_string().contains("Can't read root cert"));
	}

	#[test]
	fn garbage_sig()
	{
		// A syntactically-valid cert, nonsense signature.  Generating
		// one inline keeps the test hermetic.
		use openssl::rsa::Rsa;
		use openssl::pkey::PKey;
		use openssl::x509::X509Builder;
		use openssl::hash::MessageDigest;

		let rsa = Rsa::generate(2048).unwrap();
		let key = PKey::from_rsa(rsa).unwrap();
		let mut xb = X509Builder::new().unwrap();
		xb.set_pubkey(&key).unwrap();
		xb.sign(&key, MessageDigest::sha256()).unwrap();
		let pem = xb.build().to_pem().unwrap();

		let td = tempfile::TempDir::new().unwrap();
		let certfile = td.path().join("root.pem");
		std::fs::write(&certfile, pem).unwrap();

		let e = verify_mom(&certfile, b"mom", b"not a pkcs7").unwrap_err();
		assert!(!e.to_string().is_empty());
	}
}
