use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use std::path::Path;
use zeroize::Zeroizing;

use kora_core::error::KoraRentError;
use kora_core::types::Pubkey;

/// The operator's Ed25519 signing key.
///
/// The on-disk format is the chain's standard keypair file: a JSON array of
/// the 64-byte secret key (32-byte seed followed by the 32-byte public key).
pub struct OperatorKeypair {
    signing: SigningKey,
}

impl OperatorKeypair {
    /// Generate a fresh keypair from the OS entropy source.
    pub fn generate() -> Self {
        Self {
            signing: SigningKey::generate(&mut OsRng),
        }
    }

    /// Parse the 64-byte secret key format.
    pub fn from_bytes64(bytes: &[u8]) -> Result<Self, KoraRentError> {
        if bytes.len() != 64 {
            return Err(KoraRentError::InvalidKeypair(format!(
                "expected 64 bytes, got {}",
                bytes.len()
            )));
        }
        let mut seed = [0u8; 32];
        seed.copy_from_slice(&bytes[..32]);
        let signing = SigningKey::from_bytes(&seed);
        if signing.verifying_key().to_bytes()[..] != bytes[32..] {
            return Err(KoraRentError::InvalidKeypair(
                "public half does not match the secret seed".to_string(),
            ));
        }
        Ok(Self { signing })
    }

    /// Load from a keypair file (JSON array of 64 byte values).
    pub fn load(path: &Path) -> Result<Self, KoraRentError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| KoraRentError::Io(format!("reading keypair {}: {e}", path.display())))?;
        let bytes: Zeroizing<Vec<u8>> = Zeroizing::new(
            serde_json::from_str(&text)
                .map_err(|e| KoraRentError::InvalidKeypair(format!("{}: {e}", path.display())))?,
        );
        Self::from_bytes64(&bytes)
    }

    /// The 64-byte JSON array form, for writing a new keypair file.
    pub fn to_json(&self) -> String {
        let mut bytes = Vec::with_capacity(64);
        bytes.extend_from_slice(&self.signing.to_bytes());
        bytes.extend_from_slice(&self.signing.verifying_key().to_bytes());
        serde_json::to_string(&bytes).expect("byte vec serializes")
    }

    /// The public half as a chain address.
    pub fn pubkey(&self) -> Pubkey {
        Pubkey::from_bytes(self.signing.verifying_key().to_bytes())
    }

    pub fn pubkey_b58(&self) -> String {
        self.pubkey().to_b58()
    }

    /// Detached Ed25519 signature over `message`, base64-encoded.
    /// Ed25519 is deterministic: a fixed key and message always produce the
    /// same signature bytes.
    pub fn sign_detached(&self, message: &[u8]) -> String {
        let sig = self.signing.sign(message);
        BASE64.encode(sig.to_bytes())
    }

    /// Raw 64-byte signature over `message`, for wire transactions.
    pub fn sign_raw(&self, message: &[u8]) -> [u8; 64] {
        self.signing.sign(message).to_bytes()
    }
}

impl std::fmt::Debug for OperatorKeypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "OperatorKeypair({})", self.pubkey_b58())
    }
}

/// Verify a detached base64 signature under a base58 public key.
pub fn verify_detached(
    pubkey_b58: &str,
    message: &[u8],
    signature_b64: &str,
) -> Result<(), KoraRentError> {
    let pk = Pubkey::from_b58(pubkey_b58)?;
    let verifying = VerifyingKey::from_bytes(pk.as_bytes())
        .map_err(|e| KoraRentError::InvalidPubkey(format!("{pubkey_b58}: {e}")))?;
    let sig_bytes = BASE64
        .decode(signature_b64)
        .map_err(|e| KoraRentError::InvalidDocument(format!("signature base64: {e}")))?;
    let sig = Signature::from_slice(&sig_bytes)
        .map_err(|e| KoraRentError::InvalidDocument(format!("signature bytes: {e}")))?;
    verifying
        .verify_strict(message, &sig)
        .map_err(|_| KoraRentError::BadSignature)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_round_trip() {
        let kp = OperatorKeypair::generate();
        let json = kp.to_json();
        let bytes: Vec<u8> = serde_json::from_str(&json).unwrap();
        assert_eq!(bytes.len(), 64);
        let restored = OperatorKeypair::from_bytes64(&bytes).unwrap();
        assert_eq!(restored.pubkey_b58(), kp.pubkey_b58());
    }

    #[test]
    fn rejects_wrong_length_and_mismatched_halves() {
        assert!(OperatorKeypair::from_bytes64(&[0u8; 63]).is_err());
        let kp = OperatorKeypair::generate();
        let mut bytes: Vec<u8> = serde_json::from_str(&kp.to_json()).unwrap();
        bytes[40] ^= 0xff; // corrupt the public half
        assert!(OperatorKeypair::from_bytes64(&bytes).is_err());
    }

    #[test]
    fn detached_signatures_verify_and_are_deterministic() {
        let kp = OperatorKeypair::generate();
        let msg = [9u8; 32];
        let s1 = kp.sign_detached(&msg);
        let s2 = kp.sign_detached(&msg);
        assert_eq!(s1, s2);
        verify_detached(&kp.pubkey_b58(), &msg, &s1).unwrap();
        assert!(verify_detached(&kp.pubkey_b58(), &[0u8; 32], &s1).is_err());
    }
}
