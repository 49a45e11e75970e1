//! RSA PKCS#1 v1.5 signatures over SHA-256 digests.
//!
//! The canonical payload text is digested with SHA-256 and the digest is
//! signed; verification inverts this with the sender's public key.

use rsa::{Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};

/// Signs the SHA-256 digest of `payload` with the given private key.
pub fn sign_payload(key: &RsaPrivateKey, payload: &[u8]) -> Result<Vec<u8>, rsa::Error> {
    let digest = Sha256::digest(payload);
    key.sign(Pkcs1v15Sign::new::<Sha256>(), digest.as_slice())
}

/// Verifies a detached signature over the SHA-256 digest of `payload`.
pub fn verify_payload(key: &RsaPublicKey, payload: &[u8], signature: &[u8]) -> bool {
    let digest = Sha256::digest(payload);
    key.verify(Pkcs1v15Sign::new::<Sha256>(), digest.as_slice(), signature)
        .is_ok()
}
