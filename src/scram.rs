//! RFC 5802 SCRAM credential generation.
//!
//! Pure, allocation-only code: no I/O, no clock reads beyond the caller-supplied
//! random salt. Used by the orchestrator ([`crate::orchestrator`]) to turn a
//! plaintext password into the `(salt, StoredKey, ServerKey, iterations)` tuple
//! Kafka's SCRAM admin API expects.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha512};
use zeroize::Zeroizing;

/// Minimum accepted PBKDF2 iteration count.
pub const MIN_ITERATIONS: u32 = 4096;

/// Length in bytes of a randomly generated salt.
const SALT_LEN: usize = 32;

/// SCRAM hash mechanism, matching Kafka's `SCRAM-SHA-256`/`SCRAM-SHA-512` wire names.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Deserialize, Serialize)]
pub enum ScramMechanism {
    /// SCRAM over SHA-256.
    #[serde(rename = "SCRAM-SHA-256")]
    Sha256,
    /// SCRAM over SHA-512.
    #[serde(rename = "SCRAM-SHA-512")]
    #[default]
    Sha512,
}

impl ScramMechanism {
    /// Digest length in bytes of the underlying hash function.
    #[must_use]
    pub const fn digest_len(self) -> usize {
        match self {
            Self::Sha256 => 32,
            Self::Sha512 => 64,
        }
    }

    /// Wire name as used by the Kafka admin protocol and `rdkafka`.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sha256 => "SCRAM-SHA-256",
            Self::Sha512 => "SCRAM-SHA-512",
        }
    }
}

/// Errors produced by [`generate`].
#[derive(Debug, thiserror::Error)]
pub enum ScramError {
    /// Password was empty.
    #[error("password must not be empty")]
    EmptyPassword,
    /// Iteration count below [`MIN_ITERATIONS`].
    #[error("iterations must be >= {MIN_ITERATIONS}, got {0}")]
    IterationsTooLow(u32),
}

/// An immutable SCRAM credential tuple, transient by design: never persisted,
/// only handed to the Kafka admin client for an upsert.
#[derive(Clone)]
pub struct ScramCredential {
    mechanism: ScramMechanism,
    iterations: u32,
    salt: Vec<u8>,
    stored_key: Vec<u8>,
    server_key: Vec<u8>,
}

impl std::fmt::Debug for ScramCredential {
    /// Never prints key material, only mechanism and iteration count.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScramCredential")
            .field("mechanism", &self.mechanism)
            .field("iterations", &self.iterations)
            .finish_non_exhaustive()
    }
}

impl ScramCredential {
    /// SCRAM mechanism this credential was generated for.
    #[must_use]
    pub const fn mechanism(&self) -> ScramMechanism {
        self.mechanism
    }

    /// PBKDF2 iteration count used.
    #[must_use]
    pub const fn iterations(&self) -> u32 {
        self.iterations
    }

    /// Base64 (standard, padded) encoding of the salt.
    #[must_use]
    pub fn salt_base64(&self) -> String {
        STANDARD.encode(&self.salt)
    }

    /// Base64 (standard, padded) encoding of StoredKey.
    #[must_use]
    pub fn stored_key_base64(&self) -> String {
        STANDARD.encode(&self.stored_key)
    }

    /// Base64 (standard, padded) encoding of ServerKey.
    #[must_use]
    pub fn server_key_base64(&self) -> String {
        STANDARD.encode(&self.server_key)
    }
}

type HmacSha256 = Hmac<Sha256>;
type HmacSha512 = Hmac<Sha512>;

/// Generate a SCRAM credential for `password` per RFC 5802 §3.
///
/// A fresh 32-byte random salt is drawn on every call, so two invocations on
/// the same password never produce the same credential.
pub fn generate(
    password: &str,
    mechanism: ScramMechanism,
    iterations: u32,
) -> Result<ScramCredential, ScramError> {
    if password.is_empty() {
        return Err(ScramError::EmptyPassword);
    }
    if iterations < MIN_ITERATIONS {
        return Err(ScramError::IterationsTooLow(iterations));
    }

    let mut salt = vec![0u8; SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt);

    let (stored_key, server_key) = match mechanism {
        ScramMechanism::Sha256 => derive::<Sha256, HmacSha256>(password, &salt, iterations),
        ScramMechanism::Sha512 => derive::<Sha512, HmacSha512>(password, &salt, iterations),
    };

    Ok(ScramCredential {
        mechanism,
        iterations,
        salt,
        stored_key,
        server_key,
    })
}

/// Derive `(StoredKey, ServerKey)` for a given digest/HMAC pair.
fn derive<D, M>(password: &str, salt: &[u8], iterations: u32) -> (Vec<u8>, Vec<u8>)
where
    D: Digest + Clone + sha2::digest::FixedOutputReset,
    M: Mac + hmac::digest::KeyInit,
{
    let dk_len = D::output_size();
    let mut salted_password = Zeroizing::new(vec![0u8; dk_len]);
    pbkdf2::pbkdf2_hmac::<D>(password.as_bytes(), salt, iterations, &mut salted_password);

    let mut client_key_mac =
        M::new_from_slice(&salted_password).expect("HMAC accepts keys of any length");
    client_key_mac.update(b"Client Key");
    let client_key = client_key_mac.finalize().into_bytes();

    let mut digest = D::new();
    digest.update(&client_key);
    let stored_key = digest.finalize().to_vec();

    let mut server_key_mac =
        M::new_from_slice(&salted_password).expect("HMAC accepts keys of any length");
    server_key_mac.update(b"Server Key");
    let server_key = server_key_mac.finalize().into_bytes().to_vec();

    (stored_key, server_key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_password() {
        assert!(matches!(
            generate("", ScramMechanism::Sha256, MIN_ITERATIONS),
            Err(ScramError::EmptyPassword)
        ));
    }

    #[test]
    fn rejects_low_iterations() {
        assert!(matches!(
            generate("hunter2", ScramMechanism::Sha256, 100),
            Err(ScramError::IterationsTooLow(100))
        ));
    }

    #[test]
    fn digest_lengths_match_mechanism() {
        for mech in [ScramMechanism::Sha256, ScramMechanism::Sha512] {
            let cred = generate("hunter2", mech, MIN_ITERATIONS).unwrap();
            assert_eq!(
                STANDARD.decode(cred.stored_key_base64()).unwrap().len(),
                mech.digest_len()
            );
            assert_eq!(
                STANDARD.decode(cred.server_key_base64()).unwrap().len(),
                mech.digest_len()
            );
        }
    }

    #[test]
    fn two_invocations_differ_in_salt() {
        let a = generate("hunter2", ScramMechanism::Sha256, MIN_ITERATIONS).unwrap();
        let b = generate("hunter2", ScramMechanism::Sha256, MIN_ITERATIONS).unwrap();
        assert_ne!(a.salt_base64(), b.salt_base64());
    }

    #[test]
    fn debug_impl_does_not_leak_key_material() {
        let cred = generate("hunter2", ScramMechanism::Sha256, MIN_ITERATIONS).unwrap();
        let debug = format!("{cred:?}");
        assert!(!debug.contains(&cred.stored_key_base64()));
        assert!(!debug.contains(&cred.server_key_base64()));
    }
}
