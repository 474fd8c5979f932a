//! Single-use PKCE state for one authorization attempt.

use oauth2::{CsrfToken, PkceCodeChallenge, PkceCodeVerifier};

/// Verifier, challenge, and anti-CSRF nonce for one authorization-code exchange.
///
/// The verifier is 32 random bytes, base64url-encoded without padding. The challenge is the
/// SHA-256 of the verifier in the same encoding. The verifier leaves this process only at the
/// token-exchange step, which consumes the whole exchange.
pub struct PkceExchange {
    challenge: PkceCodeChallenge,
    verifier: PkceCodeVerifier,
    state: CsrfToken,
}

impl PkceExchange {
    pub fn new() -> Self {
        let (challenge, verifier) = PkceCodeChallenge::new_random_sha256();
        Self {
            challenge,
            verifier,
            state: CsrfToken::new_random(),
        }
    }

    pub fn challenge(&self) -> &PkceCodeChallenge {
        &self.challenge
    }

    /// The anti-CSRF nonce echoed back in the redirect.
    pub fn state(&self) -> &CsrfToken {
        &self.state
    }

    /// Consumes the exchange, handing out the verifier for the token request.
    pub fn into_verifier(self) -> PkceCodeVerifier {
        self.verifier
    }
}

impl Default for PkceExchange {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PkceExchange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PkceExchange")
            .field("challenge", &self.challenge.as_str())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use sha2::{Digest, Sha256};
    use std::collections::HashSet;

    #[test]
    fn challenge_is_sha256_of_verifier() {
        for _ in 0..100 {
            let exchange = PkceExchange::new();
            assert_eq!(exchange.challenge().method().as_str(), "S256");
            let challenge = exchange.challenge().as_str().to_string();
            let verifier = exchange.into_verifier();

            let expected = URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.secret().as_bytes()));
            assert_eq!(challenge, expected);
        }
    }

    #[test]
    fn verifier_is_256_bits_unpadded() {
        let verifier = PkceExchange::new().into_verifier();
        let decoded = URL_SAFE_NO_PAD
            .decode(verifier.secret())
            .expect("verifier is base64url without padding");
        assert_eq!(decoded.len(), 32);
        assert!(!verifier.secret().contains('='));
    }

    #[test]
    fn verifiers_do_not_repeat() {
        let mut seen = HashSet::new();
        for _ in 0..10_000 {
            let verifier = PkceExchange::new().into_verifier();
            assert!(seen.insert(verifier.secret().clone()));
        }
    }

    #[test]
    fn state_differs_per_attempt() {
        let a = PkceExchange::new();
        let b = PkceExchange::new();
        assert_ne!(a.state().secret(), b.state().secret());
    }
}
