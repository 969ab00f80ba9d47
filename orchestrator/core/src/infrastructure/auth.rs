// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::domain::environment::ProjectId;

/// Claims of a hub connection token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HubClaims {
    /// Actor the token was issued to.
    pub sub: String,
    /// Projects the bearer may subscribe to.
    #[serde(default)]
    pub projects: Vec<String>,
    pub exp: i64,
}

impl HubClaims {
    pub fn allows(&self, project: &ProjectId) -> bool {
        self.projects.iter().any(|p| *p == project.0)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("invalid token: {0}")]
    InvalidToken(String),

    #[error("token does not grant access to project {0}")]
    Forbidden(String),

    #[error("token signing failed: {0}")]
    Signing(String),
}

/// HS256 verifier (and issuer) for hub tokens.
pub struct HubTokenVerifier {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl HubTokenVerifier {
    pub fn new(secret: &str) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    pub fn verify(&self, token: &str) -> Result<HubClaims, AuthError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_required_spec_claims(&["exp", "sub"]);
        let data = decode::<HubClaims>(token, &self.decoding_key, &validation)
            .map_err(|e| AuthError::InvalidToken(e.to_string()))?;
        Ok(data.claims)
    }

    /// Verifies `token` and checks it covers `project`.
    pub fn authorize(&self, token: &str, project: &ProjectId) -> Result<HubClaims, AuthError> {
        let claims = self.verify(token)?;
        if !claims.allows(project) {
            return Err(AuthError::Forbidden(project.0.clone()));
        }
        Ok(claims)
    }

    pub fn issue(&self, claims: &HubClaims) -> Result<String, AuthError> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding_key)
            .map_err(|e| AuthError::Signing(e.to_string()))
    }
}
