//! Auth gateway: a provider contract plus the single privilege decision the
//! rest of the crate relies on.

pub mod local;
pub mod rest;

use crate::error::{GatewayError, MemorialError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub role: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Session {
    pub access_token: String,
    /// Unix seconds.
    pub expires_at: i64,
    pub user: User,
}

#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// `Ok(None)` means the credentials were wrong.
    async fn sign_in(&self, email: &str, password: &str) -> Result<Option<Session>, GatewayError>;

    async fn sign_out(&self, token: &str) -> Result<(), GatewayError>;

    async fn get_session(&self, token: &str) -> Result<Option<Session>, GatewayError>;

    async fn get_user(&self, token: &str) -> Result<Option<User>, GatewayError>;
}

/// Which signed-in users may moderate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrivilegePolicy {
    /// The user must carry `role`, or have an email in one of `email_domains`.
    Role {
        role: String,
        email_domains: Vec<String>,
    },
    /// Every signed-in user moderates.
    AnySignedIn,
}

impl Default for PrivilegePolicy {
    fn default() -> Self {
        PrivilegePolicy::Role {
            role: "admin".into(),
            email_domains: Vec::new(),
        }
    }
}

impl PrivilegePolicy {
    pub fn is_privileged(&self, user: &User) -> bool {
        match self {
            PrivilegePolicy::AnySignedIn => true,
            PrivilegePolicy::Role {
                role,
                email_domains,
            } => {
                user.role.as_deref() == Some(role.as_str())
                    || email_domains.iter().any(|d| {
                        user.email
                            .rsplit_once('@')
                            .map(|(_, domain)| domain.eq_ignore_ascii_case(d.trim_start_matches('@')))
                            .unwrap_or(false)
                    })
            }
        }
    }
}

/// What the current viewer is allowed to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Access {
    Visitor,
    Member(User),
    Moderator(User),
}

impl Access {
    pub fn is_moderator(&self) -> bool {
        matches!(self, Access::Moderator(_))
    }

    pub fn require_moderator(&self) -> Result<&User, MemorialError> {
        match self {
            Access::Moderator(user) => Ok(user),
            Access::Member(_) => Err(MemorialError::Forbidden),
            Access::Visitor => Err(MemorialError::Unauthorized),
        }
    }
}

#[derive(Clone)]
pub struct AuthGateway {
    provider: Arc<dyn AuthProvider>,
    policy: PrivilegePolicy,
}

impl AuthGateway {
    pub fn new(provider: Arc<dyn AuthProvider>, policy: PrivilegePolicy) -> Self {
        Self { provider, policy }
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Session, MemorialError> {
        if email.trim().is_empty() || password.is_empty() {
            return Err(MemorialError::validation(
                "please enter both email and password",
            ));
        }
        match self.provider.sign_in(email.trim(), password).await {
            Ok(Some(session)) => {
                tracing::info!(email = %session.user.email, "signed in");
                Ok(session)
            }
            Ok(None) => Err(MemorialError::Unauthorized),
            Err(GatewayError::Rejected { status: 429, .. }) => Err(MemorialError::validation(
                "too many sign-in attempts, try again in a minute",
            )),
            Err(e) => {
                tracing::error!(error = %e, "sign in failed");
                Err(e.into())
            }
        }
    }

    pub async fn sign_out(&self, token: &str) -> Result<(), MemorialError> {
        self.provider.sign_out(token).await.map_err(|e| {
            tracing::error!(error = %e, "sign out failed");
            e.into()
        })
    }

    pub async fn get_session(&self, token: &str) -> Result<Option<Session>, MemorialError> {
        Ok(self.provider.get_session(token).await?)
    }

    pub async fn get_user(&self, token: &str) -> Result<Option<User>, MemorialError> {
        Ok(self.provider.get_user(token).await?)
    }

    pub fn is_privileged(&self, user: &User) -> bool {
        self.policy.is_privileged(user)
    }

    /// Resolve a bearer token to an [`Access`] level. Lookup failures count as
    /// an anonymous visitor.
    pub async fn access(&self, token: Option<&str>) -> Access {
        let Some(token) = token else {
            return Access::Visitor;
        };
        match self.provider.get_user(token).await {
            Ok(Some(user)) if self.is_privileged(&user) => Access::Moderator(user),
            Ok(Some(user)) => Access::Member(user),
            Ok(None) => Access::Visitor,
            Err(e) => {
                tracing::warn!(error = %e, "user lookup failed");
                Access::Visitor
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(email: &str, role: Option<&str>) -> User {
        User {
            id: "1".into(),
            email: email.into(),
            role: role.map(String::from),
        }
    }

    #[test]
    fn role_policy_is_strict() {
        let policy = PrivilegePolicy::default();
        assert!(policy.is_privileged(&user("a@b.org", Some("admin"))));
        assert!(!policy.is_privileged(&user("a@b.org", None)));
        assert!(!policy.is_privileged(&user("a@b.org", Some("editor"))));
    }

    #[test]
    fn email_domain_grants_privilege() {
        let policy = PrivilegePolicy::Role {
            role: "admin".into(),
            email_domains: vec!["@admin.com".into()],
        };
        assert!(policy.is_privileged(&user("ops@ADMIN.com", None)));
        assert!(!policy.is_privileged(&user("ops@notadmin.com", None)));
    }

    #[test]
    fn any_signed_in_policy() {
        assert!(PrivilegePolicy::AnySignedIn.is_privileged(&user("a@b.org", None)));
    }

    #[test]
    fn access_levels() {
        assert!(matches!(
            Access::Visitor.require_moderator(),
            Err(MemorialError::Unauthorized)
        ));
        assert!(matches!(
            Access::Member(user("a@b", None)).require_moderator(),
            Err(MemorialError::Forbidden)
        ));
        assert!(Access::Moderator(user("a@b", None)).is_moderator());
    }
}
