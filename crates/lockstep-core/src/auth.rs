//! Package authentication.
//!
//! Every source describes what it knows about a package's integrity as an
//! [`AuthenticationInput`]. Once the package bytes are on disk the installer
//! runs [`authenticate`] and gets back a [`PackageAuthentication`] verdict.
//! Checking an OpenPGP signature itself is delegated to a
//! [`SignatureVerifier`].

use std::fmt;
use std::path::Path;

use lockstep_schema::PackageHash;
use thiserror::Error;

use crate::hashing::{self, HashError};

/// Key id of the HashiCorp release signing key.
pub const HASHICORP_KEY_ID: &str = "34365D9472D7468F";

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("archive checksum {actual} does not match the registry checksum {expected}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("the checksums document does not list {filename} with checksum {shasum}")]
    NotInShasums { filename: String, shasum: String },

    #[error("package does not match any of the checksums published by its source")]
    NoHashMatch,

    #[error("signature verification failed: {0}")]
    Signature(String),

    #[error("cannot hash package: {0}")]
    Hash(#[from] HashError),
}

/// A signing key as published by a registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigningKey {
    pub key_id: String,
    pub ascii_armor: String,
    /// Set for partner keys, which HashiCorp countersigns.
    pub trust_signature: String,
}

/// A registry's signed checksums for one package.
#[derive(Debug, Clone)]
pub struct SignedShasums {
    pub filename: String,
    /// Hex SHA256 of the archive, as reported in the download metadata.
    pub shasum: String,
    pub document: Vec<u8>,
    pub signature: Vec<u8>,
    pub keys: Vec<SigningKey>,
}

/// What a source can vouch for about one package.
#[derive(Debug, Clone)]
pub enum AuthenticationInput {
    /// Nothing; local mirrors are trusted as-is.
    None,
    /// The package must match one of these hashes.
    Hashes(Vec<PackageHash>),
    /// Registry download with a signed checksums document.
    Signed(SignedShasums),
}

/// Result of authenticating a fetched package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackageAuthentication {
    /// No authentication was possible.
    Unauthenticated,
    /// The package matched a checksum from its source.
    VerifiedChecksum,
    /// Signed by HashiCorp.
    Official { key_id: String },
    /// Signed by a partner key countersigned by HashiCorp.
    Partner { key_id: String },
    /// Signed by a key the registry published without a trust signature.
    Community { key_id: String },
}

impl PackageAuthentication {
    pub fn is_official(&self) -> bool {
        matches!(self, Self::Official { .. })
    }

    pub fn key_id(&self) -> Option<&str> {
        match self {
            Self::Official { key_id } | Self::Partner { key_id } | Self::Community { key_id } => {
                Some(key_id)
            }
            Self::Unauthenticated | Self::VerifiedChecksum => None,
        }
    }
}

impl fmt::Display for PackageAuthentication {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unauthenticated => f.write_str("unauthenticated"),
            Self::VerifiedChecksum => f.write_str("verified checksum"),
            Self::Official { .. } => f.write_str("signed by HashiCorp"),
            Self::Partner { .. } => f.write_str("signed by a HashiCorp partner"),
            Self::Community { .. } => f.write_str("self-signed"),
        }
    }
}

/// Checks a detached signature over a checksums document.
pub trait SignatureVerifier: std::fmt::Debug + Send + Sync {
    /// Returns the key that produced `signature`, or `None` if this verifier
    /// cannot attribute signatures to keys.
    ///
    /// Only a verifier that has checked the signature cryptographically may
    /// return a key; the key decides the signer classification.
    fn verify(
        &self,
        document: &[u8],
        signature: &[u8],
        keys: &[SigningKey],
    ) -> Result<Option<SigningKey>, AuthError>;
}

/// Requires a signature to be present but does not check it.
///
/// Packages are still held to the registry checksum and the checksums
/// document, so the verdict is [`PackageAuthentication::VerifiedChecksum`],
/// never a signer classification.
#[derive(Debug, Default, Clone, Copy)]
pub struct UncheckedSignatures;

impl SignatureVerifier for UncheckedSignatures {
    fn verify(
        &self,
        document: &[u8],
        signature: &[u8],
        keys: &[SigningKey],
    ) -> Result<Option<SigningKey>, AuthError> {
        if document.is_empty() {
            return Err(AuthError::Signature("empty checksums document".into()));
        }
        if signature.is_empty() {
            return Err(AuthError::Signature("empty signature".into()));
        }
        if keys.iter().all(|k| k.key_id.is_empty()) {
            return Err(AuthError::Signature("registry published no signing keys".into()));
        }
        Ok(None)
    }
}

/// Authenticate a package at `path` against what its source vouched for.
///
/// `sha256` is the hex digest of the archive when the package is packed.
pub fn authenticate(
    input: &AuthenticationInput,
    path: &Path,
    is_archive: bool,
    sha256: Option<&str>,
    verifier: &dyn SignatureVerifier,
) -> Result<PackageAuthentication, AuthError> {
    match input {
        AuthenticationInput::None => Ok(PackageAuthentication::Unauthenticated),
        AuthenticationInput::Hashes(hashes) if hashes.is_empty() => {
            Ok(PackageAuthentication::Unauthenticated)
        }
        AuthenticationInput::Hashes(hashes) => {
            if hashing::package_matches_any(path, is_archive, hashes)? {
                Ok(PackageAuthentication::VerifiedChecksum)
            } else {
                Err(AuthError::NoHashMatch)
            }
        }
        AuthenticationInput::Signed(signed) => {
            let actual = match sha256 {
                Some(s) => s.to_string(),
                None => hashing::sha256_file(path).map_err(HashError::from)?,
            };
            if !actual.eq_ignore_ascii_case(&signed.shasum) {
                return Err(AuthError::ChecksumMismatch {
                    expected: signed.shasum.clone(),
                    actual,
                });
            }
            if !shasums_lists(&signed.document, &signed.filename, &signed.shasum) {
                return Err(AuthError::NotInShasums {
                    filename: signed.filename.clone(),
                    shasum: signed.shasum.clone(),
                });
            }

            let Some(key) = verifier.verify(&signed.document, &signed.signature, &signed.keys)?
            else {
                return Ok(PackageAuthentication::VerifiedChecksum);
            };
            let key_id = key.key_id.to_uppercase();
            Ok(if key_id == HASHICORP_KEY_ID {
                PackageAuthentication::Official { key_id }
            } else if key.trust_signature.is_empty() {
                PackageAuthentication::Community { key_id }
            } else {
                PackageAuthentication::Partner { key_id }
            })
        }
    }
}

fn shasums_lists(document: &[u8], filename: &str, shasum: &str) -> bool {
    String::from_utf8_lossy(document).lines().any(|line| {
        let mut parts = line.split_whitespace();
        matches!(
            (parts.next(), parts.next()),
            (Some(sum), Some(name)) if sum.eq_ignore_ascii_case(shasum) && name == filename
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::extract::tests::write_zip;
    use tempfile::TempDir;

    fn signed(shasum: &str, key_id: &str, trust: &str) -> SignedShasums {
        SignedShasums {
            filename: "terraform-provider-null_3.2.1_linux_amd64.zip".into(),
            shasum: shasum.into(),
            document: format!(
                "{shasum}  terraform-provider-null_3.2.1_linux_amd64.zip\n00  other.zip\n"
            )
            .into_bytes(),
            signature: b"sig".to_vec(),
            keys: vec![SigningKey {
                key_id: key_id.into(),
                ascii_armor: String::new(),
                trust_signature: trust.into(),
            }],
        }
    }

    /// Attributes every signature to the first published key.
    #[derive(Debug)]
    struct FirstKey;

    impl SignatureVerifier for FirstKey {
        fn verify(
            &self,
            _document: &[u8],
            _signature: &[u8],
            keys: &[SigningKey],
        ) -> Result<Option<SigningKey>, AuthError> {
            Ok(keys.first().cloned())
        }
    }

    fn archive() -> (TempDir, std::path::PathBuf, String) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("pkg.zip");
        write_zip(&path, &[("terraform-provider-null", b"bin")]);
        let sum = hashing::sha256_file(&path).unwrap();
        (dir, path, sum)
    }

    #[test]
    fn classifies_signers() {
        let (_dir, path, sum) = archive();
        let verifier = FirstKey;

        let auth = authenticate(
            &AuthenticationInput::Signed(signed(&sum, "34365d9472d7468f", "")),
            &path,
            true,
            Some(&sum),
            &verifier,
        )
        .unwrap();
        assert!(auth.is_official());
        assert_eq!(auth.key_id(), Some(HASHICORP_KEY_ID));

        let auth = authenticate(
            &AuthenticationInput::Signed(signed(&sum, "ABCDEF", "trust")),
            &path,
            true,
            None,
            &verifier,
        )
        .unwrap();
        assert_eq!(auth, PackageAuthentication::Partner { key_id: "ABCDEF".into() });

        let auth = authenticate(
            &AuthenticationInput::Signed(signed(&sum, "ABCDEF", "")),
            &path,
            true,
            None,
            &verifier,
        )
        .unwrap();
        assert!(matches!(auth, PackageAuthentication::Community { .. }));
    }

    #[test]
    fn rejects_checksum_mismatch() {
        let (_dir, path, _sum) = archive();
        let other = "a".repeat(64);
        let err = authenticate(
            &AuthenticationInput::Signed(signed(&other, HASHICORP_KEY_ID, "")),
            &path,
            true,
            None,
            &UncheckedSignatures,
        )
        .unwrap_err();
        assert!(matches!(err, AuthError::ChecksumMismatch { .. }));
    }

    #[test]
    fn rejects_unlisted_file() {
        let (_dir, path, sum) = archive();
        let mut s = signed(&sum, HASHICORP_KEY_ID, "");
        s.filename = "something-else.zip".into();
        let err = authenticate(
            &AuthenticationInput::Signed(s),
            &path,
            true,
            Some(&sum),
            &UncheckedSignatures,
        )
        .unwrap_err();
        assert!(matches!(err, AuthError::NotInShasums { .. }));
    }

    #[test]
    fn hashes_and_none() {
        let (_dir, path, sum) = archive();
        let verifier = UncheckedSignatures;
        assert_eq!(
            authenticate(&AuthenticationInput::None, &path, true, None, &verifier).unwrap(),
            PackageAuthentication::Unauthenticated
        );
        assert_eq!(
            authenticate(
                &AuthenticationInput::Hashes(vec![PackageHash::zh(&sum)]),
                &path,
                true,
                None,
                &verifier
            )
            .unwrap(),
            PackageAuthentication::VerifiedChecksum
        );
        assert!(matches!(
            authenticate(
                &AuthenticationInput::Hashes(vec![PackageHash::zh(&"0".repeat(64))]),
                &path,
                true,
                None,
                &verifier
            ),
            Err(AuthError::NoHashMatch)
        ));
    }

    #[test]
    fn unchecked_signatures_need_keys() {
        assert!(UncheckedSignatures.verify(b"doc", b"sig", &[]).is_err());
        assert!(UncheckedSignatures.verify(b"doc", b"", &[]).is_err());
    }

    #[test]
    fn unchecked_signature_is_never_official() {
        let (_dir, path, sum) = archive();
        let auth = authenticate(
            &AuthenticationInput::Signed(signed(&sum, HASHICORP_KEY_ID, "")),
            &path,
            true,
            Some(&sum),
            &UncheckedSignatures,
        )
        .unwrap();
        assert_eq!(auth, PackageAuthentication::VerifiedChecksum);
        assert!(!auth.is_official());
        assert_eq!(auth.key_id(), None);
    }
}
