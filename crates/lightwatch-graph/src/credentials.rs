//! Database credentials and the parameter pointer that fronts them.
//!
//! The password is generated once, at provisioning time, and handed
//! straight to the secret store. The graph itself only ever carries the
//! secret's *declaration*; compute units find the secret through the
//! parameter pointer, never through its value.

use std::fmt;

use lightwatch_core::{Arn, LogicalId};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::graph::AttrRef;

const LETTERS_AND_DIGITS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
const PUNCTUATION: &[u8] = b"!\"#$%&'()*+,-./:;<=>?@[\\]^_`{|}~";

#[derive(Debug, Error, PartialEq)]
pub enum CredentialError {
    #[error("password policy leaves no characters to draw from")]
    EmptyAlphabet,
    #[error("password length must be in 8..=4096, got {0}")]
    InvalidLength(usize),
    #[error("random source failed: {0}")]
    Random(String),
    #[error("parameter {parameter} points at {found}, expected secret {expected}")]
    PointerMismatch {
        parameter: String,
        expected: String,
        found: String,
    },
}

/// Character rules for generated passwords.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PasswordPolicy {
    pub length: usize,
    pub exclude_punctuation: bool,
    pub include_space: bool,
    /// Extra characters never to emit.
    pub exclude_characters: String,
}

impl Default for PasswordPolicy {
    /// Consumers parse the password as a bare token, so no punctuation and
    /// no whitespace.
    fn default() -> Self {
        Self {
            length: 32,
            exclude_punctuation: true,
            include_space: false,
            exclude_characters: String::new(),
        }
    }
}

impl PasswordPolicy {
    pub fn alphabet(&self) -> Vec<u8> {
        let mut chars: Vec<u8> = LETTERS_AND_DIGITS.to_vec();
        if !self.exclude_punctuation {
            chars.extend_from_slice(PUNCTUATION);
        }
        if self.include_space {
            chars.push(b' ');
        }
        chars.retain(|c| !self.exclude_characters.as_bytes().contains(c));
        chars
    }
}

/// Draw a password from the OS random source.
///
/// Uses rejection sampling so every character of the alphabet is equally
/// likely.
pub fn generate_password(policy: &PasswordPolicy) -> Result<String, CredentialError> {
    if !(8..=4096).contains(&policy.length) {
        return Err(CredentialError::InvalidLength(policy.length));
    }
    let alphabet = policy.alphabet();
    if alphabet.is_empty() {
        return Err(CredentialError::EmptyAlphabet);
    }

    let n = alphabet.len();
    // Largest multiple of n that fits in a byte; bytes at or above it are discarded.
    let limit = 256 - (256 % n);
    let mut password = String::with_capacity(policy.length);
    let mut buf = [0u8; 64];
    while password.len() < policy.length {
        getrandom::getrandom(&mut buf).map_err(|e| CredentialError::Random(e.to_string()))?;
        for &b in &buf {
            if password.len() == policy.length {
                break;
            }
            if usize::from(b) < limit {
                password.push(char::from(alphabet[usize::from(b) % n]));
            }
        }
    }
    Ok(password)
}

/// A username/password pair. `Debug` never prints the password.
#[derive(Clone, PartialEq, Eq)]
pub struct GeneratedCredential {
    pub username: String,
    password: String,
}

impl GeneratedCredential {
    pub fn new(username: &str, password: String) -> Self {
        Self {
            username: username.to_string(),
            password,
        }
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    /// JSON document stored as the secret value.
    pub fn secret_string(&self, password_key: &str) -> String {
        let mut doc = serde_json::Map::new();
        doc.insert("username".to_string(), self.username.clone().into());
        doc.insert(password_key.to_string(), self.password.clone().into());
        serde_json::Value::Object(doc).to_string()
    }
}

impl fmt::Debug for GeneratedCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeneratedCredential")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Declaration of the secret-store entry. Holds no secret material.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CredentialSecret {
    pub name: String,
    /// Fixed username the database authenticates.
    pub username: String,
    /// JSON key the generated password is stored under.
    pub password_key: String,
    pub policy: PasswordPolicy,
}

impl CredentialSecret {
    pub fn new(name: &str, username: &str) -> Self {
        Self {
            name: name.to_string(),
            username: username.to_string(),
            password_key: "password".to_string(),
            policy: PasswordPolicy::default(),
        }
    }
}

/// Named parameter whose value is the secret's ARN.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterPointer {
    pub name: String,
    pub value: AttrRef,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecretHandle {
    pub logical_id: LogicalId,
    pub name: String,
    pub arn: Arn,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterHandle {
    pub logical_id: LogicalId,
    pub name: String,
    pub arn: Arn,
    /// What the pointer resolves to.
    pub target: Arn,
}

/// Issues credentials for secret declarations and checks the pointer
/// wiring once both sides exist.
#[derive(Debug, Default)]
pub struct CredentialManager;

impl CredentialManager {
    /// Generate the credential pair for `secret`. Called exactly once per
    /// deployment; there is no retry.
    pub fn issue(&self, secret: &CredentialSecret) -> Result<GeneratedCredential, CredentialError> {
        let password = generate_password(&secret.policy)?;
        debug!(secret = %secret.name, username = %secret.username, "credential generated");
        Ok(GeneratedCredential::new(&secret.username, password))
    }

    /// Pair the provisioned handles, confirming the parameter points at
    /// this secret and nothing else.
    pub fn link(
        &self,
        secret: SecretHandle,
        parameter: ParameterHandle,
    ) -> Result<(SecretHandle, ParameterHandle), CredentialError> {
        if parameter.target != secret.arn {
            return Err(CredentialError::PointerMismatch {
                parameter: parameter.name.clone(),
                expected: secret.arn.to_string(),
                found: parameter.target.to_string(),
            });
        }
        Ok((secret, parameter))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn is_plain(c: char) -> bool {
        c.is_ascii_alphanumeric()
    }

    #[test]
    fn default_policy_excludes_punctuation_and_space() {
        let alphabet = PasswordPolicy::default().alphabet();
        assert_eq!(alphabet.len(), 62);
        assert!(alphabet.iter().all(|&c| is_plain(char::from(c))));
    }

    #[test]
    fn generated_passwords_are_plain_tokens() {
        let policy = PasswordPolicy::default();
        for _ in 0..500 {
            let password = generate_password(&policy).unwrap();
            assert_eq!(password.len(), 32);
            assert!(password.chars().all(is_plain), "bad password: {password}");
        }
    }

    #[test]
    fn passwords_differ_between_generations() {
        let policy = PasswordPolicy::default();
        let a = generate_password(&policy).unwrap();
        let b = generate_password(&policy).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn punctuation_only_when_allowed() {
        let policy = PasswordPolicy {
            exclude_punctuation: false,
            ..Default::default()
        };
        assert_eq!(policy.alphabet().len(), 62 + PUNCTUATION.len());
    }

    #[test]
    fn excluded_characters_never_appear() {
        let policy = PasswordPolicy {
            length: 256,
            exclude_characters: "0OIl1".to_string(),
            ..Default::default()
        };
        let password = generate_password(&policy).unwrap();
        assert!(!password.contains(['0', 'O', 'I', 'l', '1']));
    }

    #[test]
    fn rejects_degenerate_policies() {
        let policy = PasswordPolicy {
            length: 4,
            ..Default::default()
        };
        assert_eq!(generate_password(&policy), Err(CredentialError::InvalidLength(4)));

        let policy = PasswordPolicy {
            exclude_characters: String::from_utf8(LETTERS_AND_DIGITS.to_vec()).unwrap(),
            ..Default::default()
        };
        assert_eq!(generate_password(&policy), Err(CredentialError::EmptyAlphabet));
    }

    #[test]
    fn debug_redacts_password() {
        let cred = GeneratedCredential::new("postgres", "hunter2hunter2".to_string());
        let shown = format!("{cred:?}");
        assert!(shown.contains("postgres"));
        assert!(!shown.contains("hunter2"));
    }

    #[test]
    fn secret_string_uses_password_key() {
        let cred = GeneratedCredential::new("postgres", "abc123XYZ".to_string());
        let doc: serde_json::Value = serde_json::from_str(&cred.secret_string("password")).unwrap();
        assert_eq!(doc["username"], "postgres");
        assert_eq!(doc["password"], "abc123XYZ");
    }

    #[test]
    fn link_rejects_pointer_to_other_secret() {
        let id = LogicalId::from_path(&lightwatch_core::ConstructPath::root("S"));
        let secret_arn = Arn::parse("arn:aws:secretsmanager:us-east-1:123456789012:secret:usage-db-credentials-AbCdEf").unwrap();
        let other = Arn::parse("arn:aws:secretsmanager:us-east-1:123456789012:secret:other-XyZ123").unwrap();
        let secret = SecretHandle {
            logical_id: id.clone(),
            name: "usage-db-credentials".to_string(),
            arn: secret_arn.clone(),
        };
        let param = |target: Arn| ParameterHandle {
            logical_id: id.clone(),
            name: "usage-credentials-arn".to_string(),
            arn: Arn::parse("arn:aws:ssm:us-east-1:123456789012:parameter/usage-credentials-arn").unwrap(),
            target,
        };

        let manager = CredentialManager;
        assert!(manager.link(secret.clone(), param(secret_arn)).is_ok());
        assert!(matches!(
            manager.link(secret, param(other)),
            Err(CredentialError::PointerMismatch { .. })
        ));
    }
}
