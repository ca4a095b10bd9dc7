//! The `Signer` capability and its two implementations: a pre-shared-key
//! HMAC signer and an ECDSA over P-256 signer, built on the `sha2`/`hmac`/
//! `p256` crates.

use hmac::{Hmac, Mac};
use p256::ecdsa::signature::{Signer as _, Verifier as _};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use sha2::Sha256;

use crate::error::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

/// Which algorithm signed an entry, stored as the `_sharc_agents.Algorithm`
/// column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    Hmac,
    EcdsaP256,
}

impl Algorithm {
    pub fn code(self) -> i64 {
        match self {
            Algorithm::Hmac => 0,
            Algorithm::EcdsaP256 => 1,
        }
    }

    /// Defaults to `Hmac` when the column is absent.
    pub fn from_code(code: Option<i64>) -> Result<Self> {
        match code {
            None | Some(0) => Ok(Algorithm::Hmac),
            Some(1) => Ok(Algorithm::EcdsaP256),
            Some(other) => Err(Error::corrupt(format!("unknown signature algorithm code {other}"))),
        }
    }
}

/// A principal able to sign and verify ledger/agent-registration preimages.
pub trait Signer: std::fmt::Debug {
    fn sign(&self, message: &[u8]) -> Vec<u8>;
    fn verify(&self, message: &[u8], signature: &[u8]) -> Result<()>;
    fn public_key(&self) -> Vec<u8>;
    fn algorithm(&self) -> Algorithm;
}

/// Builds a verify-only `Signer` from an agent's stored public key and
/// declared algorithm, used by [`crate::ledger::Ledger::verify_integrity`]
/// and agent-registration signature checks.
pub fn verifier_for(algorithm: Algorithm, public_key: &[u8]) -> Result<Box<dyn Signer>> {
    match algorithm {
        Algorithm::Hmac => Ok(Box::new(HmacSigner::new(public_key.to_vec()))),
        Algorithm::EcdsaP256 => Ok(Box::new(EcdsaP256Signer::from_public_key(public_key)?)),
    }
}

/// A pre-shared symmetric key, used as both the signing key and the
/// `PublicKey` column value for HMAC-signed agents.
#[derive(Clone)]
pub struct HmacSigner {
    key: Vec<u8>,
}

impl HmacSigner {
    pub fn new(key: Vec<u8>) -> Self {
        Self { key }
    }
}

impl std::fmt::Debug for HmacSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HmacSigner").finish_non_exhaustive()
    }
}

impl Signer for HmacSigner {
    fn sign(&self, message: &[u8]) -> Vec<u8> {
        let mut mac = HmacSha256::new_from_slice(&self.key).expect("HMAC accepts any key length");
        mac.update(message);
        mac.finalize().into_bytes().to_vec()
    }

    fn verify(&self, message: &[u8], signature: &[u8]) -> Result<()> {
        let mut mac = HmacSha256::new_from_slice(&self.key).expect("HMAC accepts any key length");
        mac.update(message);
        mac.verify_slice(signature).map_err(|_| Error::InvalidSignature)
    }

    fn public_key(&self) -> Vec<u8> {
        self.key.clone()
    }

    fn algorithm(&self) -> Algorithm {
        Algorithm::Hmac
    }
}

/// ECDSA over NIST P-256 with SHA-256 and fixed-width 64-byte IEEE-P1363
/// signatures. Holds a signing key when constructed for an agent that
/// originates signatures, or only a verifying key when reconstructed from
/// a stored public key for verification.
pub struct EcdsaP256Signer {
    signing_key: Option<SigningKey>,
    verifying_key: VerifyingKey,
}

impl EcdsaP256Signer {
    pub fn from_signing_key(signing_key: SigningKey) -> Self {
        let verifying_key = *signing_key.verifying_key();
        Self {
            signing_key: Some(signing_key),
            verifying_key,
        }
    }

    pub fn from_public_key(bytes: &[u8]) -> Result<Self> {
        let verifying_key =
            VerifyingKey::from_sec1_bytes(bytes).map_err(|_| Error::corrupt("invalid P-256 public key bytes"))?;
        Ok(Self { signing_key: None, verifying_key })
    }
}

impl std::fmt::Debug for EcdsaP256Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EcdsaP256Signer")
            .field("has_signing_key", &self.signing_key.is_some())
            .finish()
    }
}

impl Signer for EcdsaP256Signer {
    fn sign(&self, message: &[u8]) -> Vec<u8> {
        let signing_key = self.signing_key.as_ref().expect("verify-only signer cannot sign");
        let signature: Signature = signing_key.sign(message);
        signature.to_bytes().to_vec()
    }

    fn verify(&self, message: &[u8], signature: &[u8]) -> Result<()> {
        let signature = Signature::from_slice(signature).map_err(|_| Error::InvalidSignature)?;
        self.verifying_key.verify(message, &signature).map_err(|_| Error::InvalidSignature)
    }

    fn public_key(&self) -> Vec<u8> {
        self.verifying_key.to_encoded_point(true).as_bytes().to_vec()
    }

    fn algorithm(&self) -> Algorithm {
        Algorithm::EcdsaP256
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hmac_round_trip() {
        let signer = HmacSigner::new(b"shared-secret".to_vec());
        let sig = signer.sign(b"hello");
        assert!(signer.verify(b"hello", &sig).is_ok());
        assert!(signer.verify(b"goodbye", &sig).is_err());
    }

    #[test]
    fn test_hmac_tamper_detected() {
        let signer = HmacSigner::new(b"shared-secret".to_vec());
        let mut sig = signer.sign(b"hello");
        sig[0] ^= 1;
        assert!(signer.verify(b"hello", &sig).is_err());
    }

    #[test]
    fn test_ecdsa_round_trip_via_public_key() {
        let signing_key = SigningKey::from_bytes(&[7u8; 32].into()).unwrap();
        let signer = EcdsaP256Signer::from_signing_key(signing_key);
        let sig = signer.sign(b"ledger entry");
        assert_eq!(sig.len(), 64);

        let verifier = EcdsaP256Signer::from_public_key(&signer.public_key()).unwrap();
        assert!(verifier.verify(b"ledger entry", &sig).is_ok());
        assert!(verifier.verify(b"tampered", &sig).is_err());
    }

    #[test]
    fn test_algorithm_defaults_to_hmac() {
        assert_eq!(Algorithm::from_code(None).unwrap(), Algorithm::Hmac);
        assert_eq!(Algorithm::from_code(Some(1)).unwrap(), Algorithm::EcdsaP256);
        assert!(Algorithm::from_code(Some(99)).is_err());
    }
}
