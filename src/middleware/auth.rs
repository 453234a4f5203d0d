use crate::error::AppError;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;

/// The caller identity extracted from a verified bearer token.
#[derive(Debug, Clone)]
pub struct Identity {
    pub user_id: String,
}

/// Token payloads from the identity provider carry the user id in either an
/// `id` or a `userId` field; older tokens only fill `sub`.
#[derive(Debug, Deserialize)]
struct Claims {
    #[serde(default)]
    id: Option<String>,
    #[serde(default, rename = "userId")]
    user_id: Option<String>,
    #[serde(default)]
    sub: Option<String>,
    #[allow(dead_code)]
    exp: i64,
}

/// Validates externally issued bearer tokens (HS256, shared secret).
/// Stateless; no side effects.
#[derive(Clone)]
pub struct TokenVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl TokenVerifier {
    pub fn new(secret: &str) -> Self {
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }

    pub fn verify(&self, token: &str) -> Result<Identity, AppError> {
        use jsonwebtoken::errors::ErrorKind;

        let data = decode::<Claims>(token, &self.key, &self.validation).map_err(|e| {
            match e.kind() {
                ErrorKind::ExpiredSignature => AppError::AuthExpired,
                ErrorKind::InvalidSignature => AppError::AuthInvalid,
                ErrorKind::InvalidToken
                | ErrorKind::Base64(_)
                | ErrorKind::Json(_)
                | ErrorKind::Utf8(_) => AppError::AuthMalformed,
                _ => AppError::AuthInvalid,
            }
        })?;

        let claims = data.claims;
        let user_id = claims
            .id
            .or(claims.user_id)
            .or(claims.sub)
            .filter(|s| !s.trim().is_empty())
            .ok_or(AppError::AuthInvalid)?;

        Ok(Identity { user_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde_json::json;

    const SECRET: &str = "test-secret";

    fn token_for(claims: serde_json::Value) -> String {
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap()
    }

    fn far_future() -> i64 {
        chrono::Utc::now().timestamp() + 3600
    }

    #[test]
    fn accepts_id_claim() {
        let verifier = TokenVerifier::new(SECRET);
        let token = token_for(json!({"id": "u1", "exp": far_future()}));
        assert_eq!(verifier.verify(&token).unwrap().user_id, "u1");
    }

    #[test]
    fn accepts_user_id_claim() {
        let verifier = TokenVerifier::new(SECRET);
        let token = token_for(json!({"userId": "u2", "exp": far_future()}));
        assert_eq!(verifier.verify(&token).unwrap().user_id, "u2");
    }

    #[test]
    fn falls_back_to_sub() {
        let verifier = TokenVerifier::new(SECRET);
        let token = token_for(json!({"sub": "u3", "exp": far_future()}));
        assert_eq!(verifier.verify(&token).unwrap().user_id, "u3");
    }

    #[test]
    fn rejects_missing_identity() {
        let verifier = TokenVerifier::new(SECRET);
        let token = token_for(json!({"exp": far_future()}));
        assert!(matches!(verifier.verify(&token), Err(AppError::AuthInvalid)));
    }

    #[test]
    fn rejects_expired() {
        let verifier = TokenVerifier::new(SECRET);
        let token = token_for(json!({"id": "u1", "exp": chrono::Utc::now().timestamp() - 3600}));
        assert!(matches!(verifier.verify(&token), Err(AppError::AuthExpired)));
    }

    #[test]
    fn rejects_wrong_secret() {
        let verifier = TokenVerifier::new("other-secret");
        let token = token_for(json!({"id": "u1", "exp": far_future()}));
        assert!(matches!(verifier.verify(&token), Err(AppError::AuthInvalid)));
    }

    #[test]
    fn rejects_garbage() {
        let verifier = TokenVerifier::new(SECRET);
        assert!(matches!(
            verifier.verify("not-a-token"),
            Err(AppError::AuthMalformed)
        ));
    }
}
