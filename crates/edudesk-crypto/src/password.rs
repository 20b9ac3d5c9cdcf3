//! Password rules, verifier derivation, and verification
//!
//! Two verifier schemes are understood:
//! - Argon2id PHC strings (`$argon2id$v=19$m=65536,t=2,p=1$...`), the same
//!   layout libsodium's `crypto_pwhash_str` emits
//! - PBKDF2-HMAC-SHA256 with a separate salt and iteration count, stored as
//!   hex columns
//!
//! A mismatch is `Ok(false)`. Only a failure of the primitive itself is an
//! error.

use argon2::password_hash::{self, PasswordHash, PasswordHasher, PasswordVerifier as _, SaltString};
use argon2::{Algorithm, Argon2, Params, Version};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tracing::warn;
use zeroize::Zeroize;

use edudesk_core::{
    EdudeskError, EdudeskResult, PasswordRule, PasswordScheme, DEFAULT_PBKDF2_ITERATIONS,
};

use crate::random::random_array;

pub const MIN_PASSWORD_LENGTH: usize = 10;

pub const PBKDF2_SALT_SIZE: usize = 16;
pub const PBKDF2_HASH_SIZE: usize = 32;

/// Argon2id cost parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Argon2Cost {
    /// Memory cost in KiB
    pub mem_cost_kib: u32,
    pub time_cost: u32,
    pub parallelism: u32,
}

impl Argon2Cost {
    /// libsodium's "interactive" profile: 64 MiB, 2 passes, 1 lane
    pub const INTERACTIVE: Argon2Cost = Argon2Cost {
        mem_cost_kib: 65536,
        time_cost: 2,
        parallelism: 1,
    };
}

/// Check `password` against the complexity rules, reporting the first one
/// it breaks.
pub fn validate_rules(password: &str) -> Result<(), PasswordRule> {
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(PasswordRule::TooShort {
            min: MIN_PASSWORD_LENGTH,
        });
    }
    if !password.bytes().all(|b| (0x21..=0x7E).contains(&b)) {
        return Err(PasswordRule::NotPrintableAscii);
    }
    if !password.bytes().any(|b| b.is_ascii_lowercase()) {
        return Err(PasswordRule::MissingLowercase);
    }
    if !password.bytes().any(|b| b.is_ascii_uppercase()) {
        return Err(PasswordRule::MissingUppercase);
    }
    if !password.bytes().any(|b| b.is_ascii_digit()) {
        return Err(PasswordRule::MissingDigit);
    }
    if !password.bytes().any(|b| b.is_ascii_punctuation()) {
        return Err(PasswordRule::MissingSymbol);
    }
    Ok(())
}

/// A stored, one-way password verifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PasswordVerifier {
    /// Self-describing Argon2id hash string
    Phc(String),
    Pbkdf2 {
        salt: Vec<u8>,
        hash: Vec<u8>,
        iterations: u32,
    },
    /// Stored data that could not be parsed. Never verifies.
    Unusable(String),
}

impl PasswordVerifier {
    /// Rebuild a verifier from its stored columns.
    ///
    /// A `$argon2` prefix selects PHC. Otherwise `password_hash` and `salt`
    /// are read as hex PBKDF2 output; a missing or non-positive iteration
    /// count falls back to [`DEFAULT_PBKDF2_ITERATIONS`].
    pub fn from_columns(password_hash: &str, salt: Option<&str>, iterations: Option<i64>) -> Self {
        let password_hash = password_hash.trim();
        if password_hash.starts_with("$argon2") {
            return PasswordVerifier::Phc(password_hash.to_string());
        }

        let Some(salt) = salt else {
            return PasswordVerifier::Unusable("PBKDF2 verifier has no salt".into());
        };
        let (Ok(salt), Ok(hash)) = (hex::decode(salt.trim()), hex::decode(password_hash)) else {
            return PasswordVerifier::Unusable("PBKDF2 verifier is not valid hex".into());
        };
        if salt.is_empty() || hash.is_empty() {
            return PasswordVerifier::Unusable("PBKDF2 verifier is empty".into());
        }

        let iterations = iterations
            .filter(|&n| n > 0)
            .and_then(|n| u32::try_from(n).ok())
            .unwrap_or(DEFAULT_PBKDF2_ITERATIONS);

        PasswordVerifier::Pbkdf2 {
            salt,
            hash,
            iterations,
        }
    }

    /// Storage columns: `(password_hash, salt, iterations)`.
    pub fn to_columns(&self) -> (String, Option<String>, Option<u32>) {
        match self {
            PasswordVerifier::Phc(s) => (s.clone(), None, None),
            PasswordVerifier::Pbkdf2 {
                salt,
                hash,
                iterations,
            } => (hex::encode(hash), Some(hex::encode(salt)), Some(*iterations)),
            PasswordVerifier::Unusable(_) => (String::new(), None, None),
        }
    }

    pub fn scheme(&self) -> Option<PasswordScheme> {
        match self {
            PasswordVerifier::Phc(_) => Some(PasswordScheme::Argon2id),
            PasswordVerifier::Pbkdf2 { .. } => Some(PasswordScheme::Pbkdf2),
            PasswordVerifier::Unusable(_) => None,
        }
    }
}

/// Derive a fresh verifier for `password` using `scheme`.
///
/// Complexity rules are not checked here; see [`validate_rules`].
pub fn derive(
    password: &SecretString,
    scheme: PasswordScheme,
    pbkdf2_iterations: u32,
) -> EdudeskResult<PasswordVerifier> {
    match scheme {
        PasswordScheme::Argon2id => derive_argon2id(password, Argon2Cost::INTERACTIVE),
        PasswordScheme::Pbkdf2 => derive_pbkdf2(password, pbkdf2_iterations),
    }
}

pub fn derive_argon2id(password: &SecretString, cost: Argon2Cost) -> EdudeskResult<PasswordVerifier> {
    let argon2 = argon2_with(cost)?;
    let salt_bytes = random_array::<PBKDF2_SALT_SIZE>()?;
    let salt = SaltString::encode_b64(&salt_bytes)
        .map_err(|e| EdudeskError::crypto("Argon2id salt encoding", e))?;

    let phc = argon2
        .hash_password(password.expose_secret().as_bytes(), &salt)
        .map_err(|e| EdudeskError::crypto("Argon2id hashing", e))?
        .to_string();

    Ok(PasswordVerifier::Phc(phc))
}

pub fn derive_pbkdf2(password: &SecretString, iterations: u32) -> EdudeskResult<PasswordVerifier> {
    if iterations == 0 {
        return Err(EdudeskError::crypto(
            "PBKDF2-HMAC-SHA256",
            "iteration count must be positive",
        ));
    }
    let salt = random_array::<PBKDF2_SALT_SIZE>()?;
    let hash = pbkdf2_hash(password.expose_secret().as_bytes(), &salt, iterations);

    Ok(PasswordVerifier::Pbkdf2 {
        salt: salt.to_vec(),
        hash: hash.to_vec(),
        iterations,
    })
}

/// Check `password` against a stored verifier in constant time.
pub fn verify(password: &SecretString, verifier: &PasswordVerifier) -> EdudeskResult<bool> {
    match verifier {
        PasswordVerifier::Phc(phc) => {
            let parsed = match PasswordHash::new(phc) {
                Ok(parsed) => parsed,
                Err(e) => {
                    warn!(error = %e, "stored Argon2id verifier is malformed");
                    return Ok(false);
                }
            };
            match Argon2::default().verify_password(password.expose_secret().as_bytes(), &parsed) {
                Ok(()) => Ok(true),
                Err(password_hash::Error::Password) => Ok(false),
                Err(e @ password_hash::Error::Crypto) => {
                    Err(EdudeskError::crypto("Argon2id verification", e))
                }
                Err(e) => {
                    warn!(error = %e, "stored Argon2id verifier is malformed");
                    Ok(false)
                }
            }
        }
        PasswordVerifier::Pbkdf2 {
            salt,
            hash,
            iterations,
        } => {
            if *iterations == 0 || hash.len() != PBKDF2_HASH_SIZE {
                warn!("stored PBKDF2 verifier has invalid parameters");
                return Ok(false);
            }
            let mut computed = pbkdf2_hash(password.expose_secret().as_bytes(), salt, *iterations);
            let matched = bool::from(computed.ct_eq(hash.as_slice()));
            computed.zeroize();
            Ok(matched)
        }
        PasswordVerifier::Unusable(reason) => {
            warn!(reason = %reason, "stored password verifier is unusable");
            Ok(false)
        }
    }
}

fn argon2_with(cost: Argon2Cost) -> EdudeskResult<Argon2<'static>> {
    let params = Params::new(cost.mem_cost_kib, cost.time_cost, cost.parallelism, None)
        .map_err(|e| EdudeskError::crypto("Argon2id parameters", e))?;
    Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
}

fn pbkdf2_hash(password: &[u8], salt: &[u8], iterations: u32) -> [u8; PBKDF2_HASH_SIZE] {
    let mut out = [0u8; PBKDF2_HASH_SIZE];
    pbkdf2::pbkdf2_hmac::<Sha256>(password, salt, iterations, &mut out);
    out
}
