//! Password rules and argon2 hashing.

use argon2::password_hash::SaltString;
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use uuid::Uuid;

use multibpo_core::{DomainError, DomainResult};

pub const MIN_PASSWORD_CHARS: usize = 8;

/// Password chosen at sign-up, with its confirmation field.
#[derive(Clone, PartialEq, Eq)]
pub struct NewPassword {
    pub password: String,
    pub confirm: String,
}

impl core::fmt::Debug for NewPassword {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("NewPassword(..)")
    }
}

impl NewPassword {
    pub fn new(password: impl Into<String>, confirm: impl Into<String>) -> Self {
        Self {
            password: password.into(),
            confirm: confirm.into(),
        }
    }

    pub fn validate(&self) -> DomainResult<()> {
        if self.password.chars().count() < MIN_PASSWORD_CHARS {
            return Err(DomainError::validation(format!(
                "password must have at least {MIN_PASSWORD_CHARS} characters"
            )));
        }
        if self.password.chars().all(|c| c.is_ascii_digit()) {
            return Err(DomainError::validation("password cannot be entirely numeric"));
        }
        if self.password != self.confirm {
            return Err(DomainError::validation("passwords do not match"));
        }
        Ok(())
    }

    /// Validate, then hash into a PHC string.
    pub fn hash(&self) -> DomainResult<String> {
        self.validate()?;
        hash_password(&self.password)
    }
}

pub fn hash_password(password: &str) -> DomainResult<String> {
    let salt = SaltString::encode_b64(Uuid::new_v4().as_bytes())
        .map_err(|e| DomainError::validation(format!("password salt rejected: {e}")))?;

    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| DomainError::validation(format!("password could not be hashed: {e}")))
}

/// `false` for a wrong password and for an unparsable stored hash.
pub fn verify_password(password: &str, phc: &str) -> bool {
    match PasswordHash::new(phc) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_verifies_only_the_original_password() {
        let phc = NewPassword::new("s3nha-forte", "s3nha-forte").hash().unwrap();
        assert!(phc.starts_with("$argon2id$"));
        assert!(verify_password("s3nha-forte", &phc));
        assert!(!verify_password("s3nha-fraca", &phc));
    }

    #[test]
    fn salts_differ_between_hashes() {
        assert_ne!(hash_password("abcdefgh1").unwrap(), hash_password("abcdefgh1").unwrap());
    }

    #[test]
    fn weak_or_mismatched_passwords_are_rejected() {
        assert!(NewPassword::new("short1", "short1").validate().is_err());
        assert!(NewPassword::new("12345678", "12345678").validate().is_err());
        let err = NewPassword::new("abcdefgh1", "abcdefgh2").validate().unwrap_err();
        assert!(err.to_string().contains("do not match"));
    }

    #[test]
    fn garbage_hash_never_verifies() {
        assert!(!verify_password("anything", "not-a-phc-string"));
    }
}
