use super::{AuthProvider, Session, User};
use crate::error::GatewayError;
use async_trait::async_trait;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;

/// Hosted auth provider reached over `/auth/v1`.
#[derive(Clone)]
pub struct RestAuth {
    client: Client,
    base: String,
    key: String,
}

#[derive(Deserialize, Default)]
struct AppMetadata {
    #[serde(default)]
    role: Option<String>,
}

#[derive(Deserialize)]
struct RemoteUser {
    id: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    app_metadata: Option<AppMetadata>,
}

impl From<RemoteUser> for User {
    fn from(u: RemoteUser) -> Self {
        User {
            id: u.id,
            email: u.email.unwrap_or_default(),
            // the top-level role is always "authenticated"; moderation roles
            // live in app metadata
            role: u.app_metadata.and_then(|m| m.role),
        }
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_at: Option<i64>,
    #[serde(default)]
    expires_in: Option<i64>,
    user: RemoteUser,
}

#[derive(Deserialize)]
struct ExpiryClaims {
    exp: i64,
}

/// Expiry of a token, read without checking its signature.
fn token_expiry(token: &str) -> Option<i64> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.insecure_disable_signature_validation();
    validation.algorithms = vec![Algorithm::HS256, Algorithm::RS256, Algorithm::ES256];
    validation.validate_aud = false;
    decode::<ExpiryClaims>(token, &DecodingKey::from_secret(&[]), &validation)
        .ok()
        .map(|d| d.claims.exp)
}

impl RestAuth {
    pub fn new(base: &str, key: &str) -> Self {
        Self {
            client: Client::new(),
            base: base.trim_end_matches('/').to_string(),
            key: key.to_string(),
        }
    }
}

#[async_trait]
impl AuthProvider for RestAuth {
    async fn sign_in(&self, email: &str, password: &str) -> Result<Option<Session>, GatewayError> {
        let resp = self
            .client
            .post(format!("{}/auth/v1/token?grant_type=password", self.base))
            .header("apikey", &self.key)
            .json(&json!({ "email": email, "password": password }))
            .send()
            .await?;
        match resp.status() {
            s if s.is_success() => {
                let body: TokenResponse = resp.json().await?;
                let now = time::OffsetDateTime::now_utc().unix_timestamp();
                let expires_at = body
                    .expires_at
                    .or_else(|| body.expires_in.map(|s| now + s))
                    .unwrap_or(now);
                Ok(Some(Session {
                    access_token: body.access_token,
                    expires_at,
                    user: body.user.into(),
                }))
            }
            StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED => Ok(None),
            s => Err(GatewayError::Rejected {
                status: s.as_u16(),
                message: resp.text().await.unwrap_or_default(),
            }),
        }
    }

    async fn sign_out(&self, token: &str) -> Result<(), GatewayError> {
        let resp = self
            .client
            .post(format!("{}/auth/v1/logout", self.base))
            .header("apikey", &self.key)
            .bearer_auth(token)
            .send()
            .await?;
        if resp.status().is_success() || resp.status() == StatusCode::UNAUTHORIZED {
            Ok(())
        } else {
            Err(GatewayError::Rejected {
                status: resp.status().as_u16(),
                message: resp.text().await.unwrap_or_default(),
            })
        }
    }

    async fn get_session(&self, token: &str) -> Result<Option<Session>, GatewayError> {
        let Some(user) = self.get_user(token).await? else {
            return Ok(None);
        };
        Ok(Some(Session {
            access_token: token.to_string(),
            expires_at: token_expiry(token).unwrap_or_default(),
            user,
        }))
    }

    async fn get_user(&self, token: &str) -> Result<Option<User>, GatewayError> {
        let resp = self
            .client
            .get(format!("{}/auth/v1/user", self.base))
            .header("apikey", &self.key)
            .bearer_auth(token)
            .send()
            .await?;
        match resp.status() {
            s if s.is_success() => {
                let user: RemoteUser = resp.json().await?;
                Ok(Some(user.into()))
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Ok(None),
            s => Err(GatewayError::Rejected {
                status: s.as_u16(),
                message: resp.text().await.unwrap_or_default(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_comes_from_app_metadata() {
        let raw = serde_json::json!({
            "id": "u1",
            "email": "ops@example.org",
            "role": "authenticated",
            "app_metadata": { "role": "admin" }
        });
        let user: User = serde_json::from_value::<RemoteUser>(raw).unwrap().into();
        assert_eq!(user.role.as_deref(), Some("admin"));
    }

    #[test]
    fn reads_expiry_from_token() {
        let user = User {
            id: "1".into(),
            email: "a@b".into(),
            role: None,
        };
        let token =
            crate::auth::local::issue_jwt(b"other-secret", &user, time::Duration::hours(1)).unwrap();
        let exp = token_expiry(&token).unwrap();
        assert!(exp > time::OffsetDateTime::now_utc().unix_timestamp());
    }
}
