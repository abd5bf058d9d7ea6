use hmac::{digest::InvalidLength, Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

const SIGNATURE_PREFIX: &str = "sha256=";

/// Verifies `X-Hub-Signature` values against a shared secret.
#[derive(Clone)]
pub struct SignatureVerifier {
    keyed: Hmac<Sha256>,
}

impl SignatureVerifier {
    pub fn new(secret: &[u8]) -> Result<Self, InvalidLength> {
        Ok(Self {
            keyed: Hmac::<Sha256>::new_from_slice(secret)?,
        })
    }

    /// Formats the signature the sender is expected to attach to `body`.
    pub fn sign(&self, body: &[u8]) -> String {
        format!("{SIGNATURE_PREFIX}{}", hex::encode(self.digest(body)))
    }

    /// Returns whether `provided` exactly matches the signature of `body`.
    pub fn verify(&self, body: &[u8], provided: &str) -> bool {
        let expected = self.sign(body);
        expected.as_bytes().ct_eq(provided.as_bytes()).into()
    }

    fn digest(&self, body: &[u8]) -> Vec<u8> {
        let mut mac = self.keyed.clone();
        mac.update(body);
        mac.finalize().into_bytes().to_vec()
    }
}

impl std::fmt::Debug for SignatureVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignatureVerifier")
            .field("key", &"<redacted>")
            .finish()
    }
}
