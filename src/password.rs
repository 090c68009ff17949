use log::error;

use crate::error::AppError;

/// bcrypt hashing at a fixed cost. Work runs on the blocking pool.
#[derive(Debug, Clone, Copy)]
pub struct PasswordHasher {
    cost: u32,
}

impl PasswordHasher {
    pub fn new(cost: u32) -> Self {
        Self { cost }
    }

    pub fn cost(&self) -> u32 {
        self.cost
    }

    pub async fn hash(&self, password: &str) -> Result<String, AppError> {
        let password = password.to_string();
        let cost = self.cost;
        tokio::task::spawn_blocking(move || bcrypt::hash(password, cost))
            .await
            .map_err(|e| AppError::InternalError(format!("hash task failed: {e}")))?
            .map_err(|e| {
                error!("password: hashing failed: {}", e);
                AppError::InternalError("Failed to hash password".to_string())
            })
    }

    /// A malformed stored hash counts as a mismatch.
    pub async fn verify(&self, password: &str, hash: &str) -> Result<bool, AppError> {
        let password = password.to_string();
        let hash = hash.to_string();
        tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash).unwrap_or(false))
            .await
            .map_err(|e| AppError::InternalError(format!("verify task failed: {e}")))
    }

    /// Burn one verification so a missing account takes as long as a wrong password.
    pub async fn dummy_verify(&self) -> Result<(), AppError> {
        let hash = self.hash("dummy-password-for-timing").await?;
        self.verify("not-the-real-password", &hash).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_hash_and_verify() {
        let hasher = PasswordHasher::new(4);
        let hash = hasher.hash("correct horse").await.unwrap();
        assert!(hash.starts_with("$2"));
        assert!(hasher.verify("correct horse", &hash).await.unwrap());
        assert!(!hasher.verify("battery staple", &hash).await.unwrap());
    }

    #[tokio::test]
    async fn test_malformed_hash_is_mismatch() {
        let hasher = PasswordHasher::new(4);
        assert!(!hasher.verify("anything", "plaintext").await.unwrap());
    }

    #[tokio::test]
    async fn test_hash_embeds_cost() {
        let hasher = PasswordHasher::new(5);
        let hash = hasher.hash("correct horse").await.unwrap();
        assert!(hash.contains("$05$"));
    }
}
