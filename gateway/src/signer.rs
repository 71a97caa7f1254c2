//! HMAC-SHA256 request signing. Callers pass the canonical query string they are about to send
//! and get back the hex signature to append as the final `signature` parameter — the signature
//! must cover the exact bytes transmitted, not a re-derived or reordered copy of them.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Signs canonical request payloads with a fixed API secret.
///
/// HMAC-SHA256 over the exact bytes sent, hex-encoded. The remote accepts parameters in any
/// order as long as the signature matches the bytes actually transmitted — this type has no
/// opinion on ordering, it only signs whatever canonical string the `RestClient` hands it.
pub struct Signer {
    secret: String,
}

impl Signer {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// Signs `payload`, returning the lowercase hex signature.
    pub fn sign(&self, payload: &str) -> String {
        // `Hmac::new_from_slice` only errors when the underlying hash has a fixed key-size
        // requirement shorter than provided; SHA256-HMAC accepts keys of any length.
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .expect("HMAC-SHA256 accepts keys of any length");
        mac.update(payload.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_known_hmac_sha256_vector() {
        // Binance's own API documentation example vector.
        let signer = Signer::new("NhqPtmdSJYdKjVHjA7PZj4Mge3R5YNiP1e3UZjInClVN65XAbvqqM6A7H5fATj0j");
        let payload = "symbol=LTCBTC&side=BUY&type=LIMIT&timeInForce=GTC&quantity=1&price=0.1&recvWindow=5000&timestamp=1499827319559";
        let signature = signer.sign(payload);
        assert_eq!(
            signature,
            "c8db56825ae71d6d79447849e617115f4a920fa2acdcab2b053c4b2838bd6b1"
        );
    }

    #[test]
    fn same_payload_same_signature() {
        let signer = Signer::new("secret");
        assert_eq!(signer.sign("a=1&b=2"), signer.sign("a=1&b=2"));
    }

    #[test]
    fn different_payload_different_signature() {
        let signer = Signer::new("secret");
        assert_ne!(signer.sign("a=1"), signer.sign("a=2"));
    }
}
