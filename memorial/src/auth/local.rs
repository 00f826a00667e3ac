use super::{AuthProvider, Session, User};
use crate::error::GatewayError;
use anyhow::{Context, Result};
use argon2::password_hash::{
    rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString,
};
use argon2::Argon2;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Arc,
    time::{Duration as StdDuration, Instant},
};
use time::{Duration, OffsetDateTime};

/// Account record kept in `auth.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Account {
    pub id: String,
    pub email: String,
    pub password_hash: String,
    #[serde(default)]
    pub role: Option<String>,
}

impl Account {
    fn user(&self) -> User {
        User {
            id: self.id.clone(),
            email: self.email.clone(),
            role: self.role.clone(),
        }
    }
}

/// Persistent authentication state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthFile {
    pub jwt_secret: String,
    pub accounts: Vec<Account>,
    pub created_at: i64,
}

impl AuthFile {
    fn new() -> Self {
        use rand::RngCore;
        let mut secret = vec![0u8; 32];
        rand::thread_rng().fill_bytes(&mut secret);
        Self {
            jwt_secret: STANDARD.encode(&secret),
            accounts: Vec::new(),
            created_at: OffsetDateTime::now_utc().unix_timestamp(),
        }
    }

    /// Add an account ensuring a unique email (case-insensitive).
    pub fn add_account(&mut self, email: &str, password: &str, role: Option<&str>) -> Result<User> {
        if self
            .accounts
            .iter()
            .any(|a| a.email.eq_ignore_ascii_case(email))
        {
            anyhow::bail!("duplicate_user");
        }
        let account = Account {
            id: uuid::Uuid::new_v4().to_string(),
            email: email.to_string(),
            password_hash: hash_password(password)?,
            role: role.map(String::from),
        };
        let user = account.user();
        self.accounts.push(account);
        Ok(user)
    }

    fn find(&self, email: &str) -> Option<&Account> {
        self.accounts
            .iter()
            .find(|a| a.email.eq_ignore_ascii_case(email))
    }
}

/// Hash a password using argon2id.
pub fn hash_password(pass: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(pass.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!(e))?
        .to_string();
    Ok(hash)
}

/// Verify a password against an encoded hash.
pub fn verify_password(pass: &str, hash: &str) -> bool {
    if let Ok(parsed) = PasswordHash::new(hash) {
        Argon2::default()
            .verify_password(pass.as_bytes(), &parsed)
            .is_ok()
    } else {
        false
    }
}

/// Claims stored within issued JWTs.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
pub struct Claims {
    pub sub: String,
    pub email: String,
    pub exp: usize,
}

/// Issue a JWT for an account valid for the provided duration.
pub fn issue_jwt(secret: &[u8], user: &User, valid_for: Duration) -> Result<String> {
    let exp = (OffsetDateTime::now_utc() + valid_for).unix_timestamp() as usize;
    let claims = Claims {
        sub: user.id.clone(),
        email: user.email.clone(),
        exp,
    };
    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret),
    )?;
    Ok(token)
}

/// Verify a JWT and return its claims if valid.
pub fn verify_jwt(secret: &[u8], token: &str) -> Result<Claims> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = true;
    validation.leeway = 0;
    let data = decode::<Claims>(token, &DecodingKey::from_secret(secret), &validation)?;
    if data.claims.exp < OffsetDateTime::now_utc().unix_timestamp() as usize {
        anyhow::bail!("expired");
    }
    Ok(data.claims)
}

/// Simple in-memory login rate limiter.
#[derive(Clone)]
pub struct LoginRateLimiter {
    inner: Arc<Mutex<HashMap<String, Vec<Instant>>>>,
    max: usize,
    window: StdDuration,
}

impl LoginRateLimiter {
    pub fn new(max: usize, window: StdDuration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
            max,
            window,
        }
    }

    /// Returns true if the attempt is allowed, false if rate limited.
    pub fn check(&self, key: &str) -> bool {
        let mut guard = self.inner.lock();
        let now = Instant::now();
        let entry = guard.entry(key.to_lowercase()).or_default();
        entry.retain(|t| now.duration_since(*t) < self.window);
        if entry.len() >= self.max {
            return false;
        }
        entry.push(now);
        true
    }
}

const SESSION_HOURS: i64 = 24;

/// Password accounts on disk with HS256 session tokens.
pub struct LocalAuth {
    file: PathBuf,
    state: Mutex<AuthFile>,
    secret: Vec<u8>,
    revoked: Mutex<HashMap<String, usize>>,
    limiter: LoginRateLimiter,
}

impl LocalAuth {
    /// Load `path`, creating it (and the bootstrap admin) on first run.
    pub async fn open<P: AsRef<Path>>(path: P, bootstrap: Option<(&str, &str)>) -> Result<Self> {
        let file = path.as_ref().to_path_buf();
        let mut state = match tokio::fs::read(&file).await {
            Ok(bytes) => serde_json::from_slice(&bytes).context("invalid auth file")?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => AuthFile::new(),
            Err(e) => return Err(e.into()),
        };
        let mut dirty = !file.exists();
        if let Some((email, password)) = bootstrap {
            if state.accounts.is_empty() {
                state.add_account(email, password, Some("admin"))?;
                tracing::info!(email, "created bootstrap admin");
                dirty = true;
            }
        }
        if dirty {
            persist(&file, &state).await?;
        }
        let secret = STANDARD.decode(&state.jwt_secret)?;
        Ok(Self {
            file,
            state: Mutex::new(state),
            secret,
            revoked: Mutex::new(HashMap::new()),
            limiter: LoginRateLimiter::new(5, StdDuration::from_secs(60)),
        })
    }

    /// Register another account and persist the auth file.
    pub async fn add_account(&self, email: &str, password: &str, role: Option<&str>) -> Result<User> {
        let (user, snapshot) = {
            let mut state = self.state.lock();
            let user = state.add_account(email, password, role)?;
            (user, state.clone())
        };
        persist(&self.file, &snapshot).await?;
        Ok(user)
    }

    fn claims(&self, token: &str) -> Option<Claims> {
        if self.revoked.lock().contains_key(token) {
            return None;
        }
        verify_jwt(&self.secret, token).ok()
    }

    fn user_for(&self, claims: &Claims) -> Option<User> {
        self.state
            .lock()
            .accounts
            .iter()
            .find(|a| a.id == claims.sub)
            .map(Account::user)
    }
}

async fn persist(file: &Path, state: &AuthFile) -> Result<()> {
    if let Some(dir) = file.parent() {
        tokio::fs::create_dir_all(dir).await?;
    }
    tokio::fs::write(file, serde_json::to_vec_pretty(state)?).await?;
    Ok(())
}

#[async_trait]
impl AuthProvider for LocalAuth {
    async fn sign_in(&self, email: &str, password: &str) -> Result<Option<Session>, GatewayError> {
        if !self.limiter.check(email) {
            return Err(GatewayError::Rejected {
                status: 429,
                message: "rate_limited".into(),
            });
        }
        let account = self.state.lock().find(email).cloned();
        let Some(account) = account else {
            return Ok(None);
        };
        if !verify_password(password, &account.password_hash) {
            return Ok(None);
        }
        let user = account.user();
        let token = issue_jwt(&self.secret, &user, Duration::hours(SESSION_HOURS))
            .map_err(|e| GatewayError::Transport(e.to_string()))?;
        let expires_at = (OffsetDateTime::now_utc() + Duration::hours(SESSION_HOURS)).unix_timestamp();
        Ok(Some(Session {
            access_token: token,
            expires_at,
            user,
        }))
    }

    async fn sign_out(&self, token: &str) -> Result<(), GatewayError> {
        if let Some(claims) = self.claims(token) {
            let now = OffsetDateTime::now_utc().unix_timestamp() as usize;
            let mut revoked = self.revoked.lock();
            revoked.retain(|_, exp| *exp > now);
            revoked.insert(token.to_string(), claims.exp);
        }
        Ok(())
    }

    async fn get_session(&self, token: &str) -> Result<Option<Session>, GatewayError> {
        let Some(claims) = self.claims(token) else {
            return Ok(None);
        };
        Ok(self.user_for(&claims).map(|user| Session {
            access_token: token.to_string(),
            expires_at: claims.exp as i64,
            user,
        }))
    }

    async fn get_user(&self, token: &str) -> Result<Option<User>, GatewayError> {
        Ok(self.claims(token).and_then(|c| self.user_for(&c)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_and_verify() {
        let hash = hash_password("secret").unwrap();
        assert!(verify_password("secret", &hash));
        assert!(!verify_password("bad", &hash));
    }

    #[test]
    fn jwt_expiry() {
        let user = User {
            id: "1".into(),
            email: "a@b".into(),
            role: None,
        };
        let token = issue_jwt(b"secret", &user, Duration::seconds(60)).unwrap();
        assert_eq!(verify_jwt(b"secret", &token).unwrap().sub, "1");
        let expired = issue_jwt(b"secret", &user, Duration::seconds(-10)).unwrap();
        assert!(verify_jwt(b"secret", &expired).is_err());
    }

    #[test]
    fn rate_limiter_blocks() {
        let limiter = LoginRateLimiter::new(2, StdDuration::from_secs(60));
        assert!(limiter.check("u"));
        assert!(limiter.check("U"));
        assert!(!limiter.check("u"));
    }

    #[tokio::test]
    async fn bootstrap_sign_in_and_out() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("auth.json");
        let auth = LocalAuth::open(&path, Some(("admin@example.org", "change-me")))
            .await
            .unwrap();
        assert!(auth.sign_in("admin@example.org", "nope").await.unwrap().is_none());
        let session = auth
            .sign_in("Admin@Example.org", "change-me")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(session.user.role.as_deref(), Some("admin"));
        let token = session.access_token.clone();
        assert!(auth.get_user(&token).await.unwrap().is_some());
        auth.sign_out(&token).await.unwrap();
        assert!(auth.get_user(&token).await.unwrap().is_none());
        assert!(auth.get_session(&token).await.unwrap().is_none());

        // bootstrap does not run twice
        let again = LocalAuth::open(&path, Some(("other@example.org", "x"))).await.unwrap();
        assert_eq!(again.state.lock().accounts.len(), 1);
    }

    #[tokio::test]
    async fn duplicate_email_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let auth = LocalAuth::open(tmp.path().join("auth.json"), None).await.unwrap();
        auth.add_account("a@b.org", "pw", None).await.unwrap();
        assert!(auth.add_account("A@B.org", "pw", None).await.is_err());
    }
}
