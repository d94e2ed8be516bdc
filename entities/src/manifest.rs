//! Ephemeral-key signing and verification over a canonical manifest
//! encoding (C2).
//!
//! The signature protects the integrity of the advertised file set; it does
//! not prove identity beyond binding files to the ephemeral key that
//! produced them. Canonical serialization uses `postcard`'s deterministic
//! encoding, so the verifier can byte-for-byte reconstruct what was signed.

use rand::rngs::OsRng;
use rsa::{
    pkcs8::{DecodePublicKey, EncodePublicKey},
    Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{
    error::{ManifestError, Result},
    file_node::FileNode,
};

const KEY_BITS: usize = 2048;

/// A file manifest plus an ephemeral public key and a signature binding the
/// two together.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SignedManifest {
    pub files: Vec<FileNode>,
    /// DER-encoded SubjectPublicKeyInfo of the ephemeral signing key.
    pub public_key: Vec<u8>,
    /// PKCS#1 v1.5 signature over SHA-256 of `canonical_encoding(files)`.
    pub signature: Vec<u8>,
}

/// Deterministically encode `files` the same way on both sides of the
/// signature. Both [`sign`] and [`verify`] must use this function.
pub fn canonical_encoding(files: &[FileNode]) -> Result<Vec<u8>> {
    Ok(postcard::to_allocvec(files)?)
}

/// Generate an ephemeral 2048-bit RSA key and sign `files`.
pub fn sign(files: Vec<FileNode>) -> Result<SignedManifest> {
    let mut rng = OsRng;
    let private_key = RsaPrivateKey::new(&mut rng, KEY_BITS)
        .map_err(|e| ManifestError::KeyGeneration(e.to_string()))?;
    let public_key = RsaPublicKey::from(&private_key);

    let canonical = canonical_encoding(&files)?;
    let digest = Sha256::digest(&canonical);

    let signature = private_key
        .sign(Pkcs1v15Sign::new::<Sha256>(), &digest)
        .map_err(|e| ManifestError::Signing(e.to_string()))?;

    let public_key_der = public_key
        .to_public_key_der()
        .map_err(|e| ManifestError::MalformedKey(e.to_string()))?
        .into_vec();

    Ok(SignedManifest {
        files,
        public_key: public_key_der,
        signature,
    })
}

/// Verify that `manifest.signature` is a valid PKCS#1v1.5/SHA-256 signature
/// by `manifest.public_key` over the canonical encoding of `manifest.files`.
pub fn verify(manifest: &SignedManifest) -> Result<()> {
    let public_key = RsaPublicKey::from_public_key_der(&manifest.public_key)
        .map_err(|e| ManifestError::MalformedKey(e.to_string()))?;

    let canonical = canonical_encoding(&manifest.files)?;
    let digest = Sha256::digest(&canonical);

    public_key
        .verify(Pkcs1v15Sign::new::<Sha256>(), &digest, &manifest.signature)
        .map_err(|_| ManifestError::Invalid)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_files() -> Vec<FileNode> {
        vec![FileNode {
            relative_path: "hello.txt".into(),
            is_directory: false,
            size: 11,
            sha256_hex: "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
                .into(),
            children: Vec::new(),
        }]
    }

    #[test]
    fn sign_then_verify_succeeds() {
        let signed = sign(sample_files()).unwrap();
        verify(&signed).unwrap();
    }

    #[test]
    fn tampered_files_fail_verification() {
        let mut signed = sign(sample_files()).unwrap();
        signed.files[0].size += 1;
        assert!(verify(&signed).is_err());
    }

    #[test]
    fn tampered_signature_fails_verification() {
        let mut signed = sign(sample_files()).unwrap();
        let last = signed.signature.len() - 1;
        signed.signature[last] ^= 0xFF;
        assert!(verify(&signed).is_err());
    }

    #[test]
    fn tampered_public_key_fails_verification() {
        let other = sign(sample_files()).unwrap();
        let mut signed = sign(sample_files()).unwrap();
        signed.public_key = other.public_key;
        assert!(verify(&signed).is_err());
    }
}
