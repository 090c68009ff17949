//! Encrypted account tokens.
//!
//! A token is a JWT signed with the configured HMAC secret, sealed with
//! AES-256-GCM and encoded as unpadded base64url. The sealed form is
//! `nonce || ciphertext`; the configured IV is bound as associated data.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use base64ct::{Base64UrlUnpadded, Encoding};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::config::AuthConfig;
use crate::constants::TOKEN_ENCRYPTION_KEY_LENGTH;

const NONCE_LENGTH: usize = 12;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    #[error("token expired")]
    Expired,
    #[error("invalid token: {0}")]
    Invalid(String),
    #[error("token encoding failed: {0}")]
    Encoding(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenData {
    #[serde(rename = "_account")]
    pub account: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    pub data: TokenData,
    pub iat: i64,
    pub exp: i64,
}

pub struct TokenService {
    algorithm: Algorithm,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    lifetime_secs: i64,
    cipher: Aes256Gcm,
    associated_data: Vec<u8>,
}

impl TokenService {
    pub fn new(config: &AuthConfig) -> Result<Self, TokenError> {
        let algorithm = config
            .algorithm()
            .map_err(|e| TokenError::Encoding(e.to_string()))?;
        if config.encryption_key.len() != TOKEN_ENCRYPTION_KEY_LENGTH {
            return Err(TokenError::Encoding(format!(
                "encryption key must be {} bytes",
                TOKEN_ENCRYPTION_KEY_LENGTH
            )));
        }
        let cipher = Aes256Gcm::new_from_slice(config.encryption_key.as_bytes())
            .map_err(|e| TokenError::Encoding(e.to_string()))?;
        let lifetime_secs = i64::try_from(config.token_lifetime_secs)
            .map_err(|_| TokenError::Encoding("token lifetime out of range".to_string()))?;

        Ok(Self {
            algorithm,
            encoding_key: EncodingKey::from_secret(config.token_secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.token_secret.as_bytes()),
            lifetime_secs,
            cipher,
            associated_data: config.encryption_iv.as_bytes().to_vec(),
        })
    }

    /// Issue a token for `account_id` valid from now.
    pub fn issue(&self, account_id: &str) -> Result<String, TokenError> {
        self.issue_at(account_id, chrono::Utc::now().timestamp())
    }

    pub fn issue_at(&self, account_id: &str, issued_at: i64) -> Result<String, TokenError> {
        let claims = TokenClaims {
            data: TokenData {
                account: account_id.to_string(),
            },
            iat: issued_at,
            exp: issued_at + self.lifetime_secs,
        };
        let jwt = encode(&Header::new(self.algorithm), &claims, &self.encoding_key)
            .map_err(|e| TokenError::Encoding(e.to_string()))?;

        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(
                &nonce,
                Payload {
                    msg: jwt.as_bytes(),
                    aad: &self.associated_data,
                },
            )
            .map_err(|e| TokenError::Encoding(e.to_string()))?;

        let mut sealed = Vec::with_capacity(NONCE_LENGTH + ciphertext.len());
        sealed.extend_from_slice(nonce.as_slice());
        sealed.extend_from_slice(&ciphertext);
        Ok(Base64UrlUnpadded::encode_string(&sealed))
    }

    /// Open and verify a token, returning its claims.
    pub fn decode(&self, token: &str) -> Result<TokenClaims, TokenError> {
        let sealed = Base64UrlUnpadded::decode_vec(token)
            .map_err(|_| TokenError::Invalid("malformed encoding".to_string()))?;
        if sealed.len() <= NONCE_LENGTH {
            return Err(TokenError::Invalid("truncated".to_string()));
        }
        let (nonce, ciphertext) = sealed.split_at(NONCE_LENGTH);
        let plaintext = self
            .cipher
            .decrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: ciphertext,
                    aad: &self.associated_data,
                },
            )
            .map_err(|_| TokenError::Invalid("decryption failed".to_string()))?;
        let jwt = String::from_utf8(plaintext)
            .map_err(|_| TokenError::Invalid("not utf-8".to_string()))?;

        let mut validation = Validation::new(self.algorithm);
        validation.leeway = 0;
        let data = decode::<TokenClaims>(&jwt, &self.decoding_key, &validation).map_err(
            |e| match e.kind() {
                ErrorKind::ExpiredSignature => TokenError::Expired,
                _ => TokenError::Invalid(e.to_string()),
            },
        )?;
        Ok(data.claims)
    }

    /// Account id carried by a valid token.
    pub fn verify(&self, token: &str) -> Result<String, TokenError> {
        Ok(self.decode(token)?.data.account)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> AuthConfig {
        AuthConfig {
            token_secret: "test-secret-key-for-unit-tests".to_string(),
            encryption_key: "0123456789abcdef0123456789abcdef".to_string(),
            encryption_iv: "initialization-v".to_string(),
            token_lifetime_secs: 60,
            ..AuthConfig::default()
        }
    }

    #[test]
    fn test_issue_and_verify() {
        let tokens = TokenService::new(&config()).unwrap();
        let token = tokens.issue("account-1").unwrap();
        let claims = tokens.decode(&token).unwrap();
        assert_eq!(claims.data.account, "account-1");
        assert_eq!(claims.exp - claims.iat, 60);
        assert!(!token.contains('.'));
    }

    #[test]
    fn test_each_token_uses_fresh_nonce() {
        let tokens = TokenService::new(&config()).unwrap();
        let now = chrono::Utc::now().timestamp();
        let a = tokens.issue_at("account-1", now).unwrap();
        let b = tokens.issue_at("account-1", now).unwrap();
        assert_ne!(a, b);
        assert_eq!(tokens.verify(&a).unwrap(), tokens.verify(&b).unwrap());
    }

    #[test]
    fn test_expired_token() {
        let tokens = TokenService::new(&config()).unwrap();
        let token = tokens
            .issue_at("account-1", chrono::Utc::now().timestamp() - 120)
            .unwrap();
        assert_eq!(tokens.decode(&token), Err(TokenError::Expired));
    }

    #[test]
    fn test_tampered_token() {
        let tokens = TokenService::new(&config()).unwrap();
        let token = tokens.issue("account-1").unwrap();
        let mut bytes = Base64UrlUnpadded::decode_vec(&token).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        let tampered = Base64UrlUnpadded::encode_string(&bytes);
        assert!(matches!(tokens.decode(&tampered), Err(TokenError::Invalid(_))));
        assert!(matches!(tokens.decode("not a token!"), Err(TokenError::Invalid(_))));
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let tokens = TokenService::new(&config()).unwrap();
        let token = tokens.issue("account-1").unwrap();
        let other = TokenService::new(&AuthConfig {
            token_secret: "another-secret".to_string(),
            ..config()
        })
        .unwrap();
        assert!(matches!(other.decode(&token), Err(TokenError::Invalid(_))));
    }

    #[test]
    fn test_wrong_iv_rejected() {
        let tokens = TokenService::new(&config()).unwrap();
        let token = tokens.issue("account-1").unwrap();
        let other = TokenService::new(&AuthConfig {
            encryption_iv: "different-iv".to_string(),
            ..config()
        })
        .unwrap();
        assert!(matches!(other.decode(&token), Err(TokenError::Invalid(_))));
    }

    #[test]
    fn test_algorithm_mismatch_rejected() {
        let tokens = TokenService::new(&config()).unwrap();
        let token = tokens.issue("account-1").unwrap();
        let other = TokenService::new(&AuthConfig {
            token_algorithm: "HS512".to_string(),
            ..config()
        })
        .unwrap();
        assert!(matches!(other.decode(&token), Err(TokenError::Invalid(_))));
    }

    #[test]
    fn test_short_key_rejected() {
        let result = TokenService::new(&AuthConfig {
            encryption_key: "short".to_string(),
            ..config()
        });
        assert!(matches!(result, Err(TokenError::Encoding(_))));
    }
}
