// Access token verification: local HS256 JWTs and remote introspection.
//
// The local mode decodes a single `workspace_id`-shaped claim set into the
// richer identity shape the relay needs once permissions are per-document
// rather than per-workspace. The remote mode's TTL cache is a HashMap plus
// `Instant` bookkeeping with an LRU ceiling, so a relay fronting many
// short-lived sessions can't grow the cache unbounded.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context, Result};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Identity resolved from an access token, regardless of which mode
/// produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: Uuid,
    pub username: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct LocalClaims {
    sub: String,
    username: Option<String>,
    email: Option<String>,
}

/// Verifies tokens issued locally by this deployment's identity layer.
#[derive(Clone)]
pub struct LocalJwtVerifier {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl LocalJwtVerifier {
    pub fn new(secret: &str) -> Result<Self> {
        if secret.len() < 32 {
            bail!("jwt secret must be at least 32 characters long");
        }

        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        Ok(Self { decoding_key: DecodingKey::from_secret(secret.as_bytes()), validation })
    }

    fn verify(&self, token: &str) -> Result<Identity> {
        let claims =
            decode::<LocalClaims>(token, &self.decoding_key, &self.validation)
                .context("failed to decode access token")?
                .claims;

        let user_id = Uuid::parse_str(&claims.sub)
            .with_context(|| format!("access token subject '{}' is not a UUID", claims.sub))?;

        Ok(Identity { user_id, username: claims.username, email: claims.email })
    }
}

#[derive(Debug, Deserialize)]
struct IntrospectionResponse {
    active: bool,
    user_id: Uuid,
    username: Option<String>,
    email: Option<String>,
}

struct CacheEntry {
    identity: Identity,
    cached_at: Instant,
}

/// Verifies tokens by asking a remote identity service, caching the
/// result for `ttl` so a chatty client doesn't round-trip every frame.
#[derive(Clone)]
pub struct RemoteIntrospectionVerifier {
    http: reqwest::Client,
    introspection_url: String,
    ttl: Duration,
    capacity: usize,
    cache: Arc<RwLock<HashMap<String, CacheEntry>>>,
}

const DEFAULT_CACHE_CAPACITY: usize = 10_000;
const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(60);

impl RemoteIntrospectionVerifier {
    pub fn new(identity_service_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            introspection_url: format!("{}/v1/introspect", identity_service_url.into()),
            ttl: DEFAULT_CACHE_TTL,
            capacity: DEFAULT_CACHE_CAPACITY,
            cache: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    #[cfg(test)]
    fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    async fn verify(&self, token: &str) -> Result<Identity> {
        if let Some(entry) = self.cache.read().await.get(token) {
            if entry.cached_at.elapsed() < self.ttl {
                return Ok(entry.identity.clone());
            }
        }

        let response = self
            .http
            .post(&self.introspection_url)
            .json(&serde_json::json!({ "token": token }))
            .send()
            .await
            .context("failed to reach identity service for introspection")?
            .error_for_status()
            .context("identity service returned an error status")?
            .json::<IntrospectionResponse>()
            .await
            .context("failed to parse introspection response")?;

        if !response.active {
            anyhow::bail!("token is not active (revoked or expired)");
        }

        let identity = Identity {
            user_id: response.user_id,
            username: response.username,
            email: response.email,
        };

        self.insert(token.to_string(), identity.clone()).await;
        Ok(identity)
    }

    async fn insert(&self, token: String, identity: Identity) {
        let mut cache = self.cache.write().await;
        if cache.len() >= self.capacity && !cache.contains_key(&token) {
            if let Some(oldest_key) =
                cache.iter().min_by_key(|(_, entry)| entry.cached_at).map(|(key, _)| key.clone())
            {
                cache.remove(&oldest_key);
            }
        }
        cache.insert(token, CacheEntry { identity, cached_at: Instant::now() });
    }
}

/// Resolves an access token to an `Identity`, local-JWT or
/// remote-introspection depending on how the relay is configured.
#[derive(Clone)]
pub enum AuthVerifier {
    Local(LocalJwtVerifier),
    Remote(RemoteIntrospectionVerifier),
}

impl AuthVerifier {
    pub fn local(secret: &str) -> Result<Self> {
        Ok(Self::Local(LocalJwtVerifier::new(secret)?))
    }

    pub fn remote(identity_service_url: impl Into<String>) -> Self {
        Self::Remote(RemoteIntrospectionVerifier::new(identity_service_url))
    }

    /// Build from config: a non-empty `identity_service_url` selects
    /// remote introspection, otherwise the relay verifies local JWTs
    /// signed with `jwt_secret`.
    pub fn from_config(jwt_secret: &str, identity_service_url: Option<&str>) -> Result<Self> {
        match identity_service_url {
            Some(url) if !url.is_empty() => Ok(Self::remote(url)),
            _ => Self::local(jwt_secret),
        }
    }

    pub async fn verify(&self, token: &str) -> Result<Identity> {
        if token.trim().is_empty() {
            return Err(anyhow!("access token must not be empty"));
        }
        match self {
            Self::Local(verifier) => verifier.verify(token),
            Self::Remote(verifier) => verifier.verify(token).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde::Serialize;

    const TEST_SECRET: &str = "scriptum_test_secret_that_is_definitely_long_enough";

    #[derive(Serialize)]
    struct TestClaims {
        sub: String,
        username: Option<String>,
        email: Option<String>,
        exp: i64,
    }

    fn sign(claims: &TestClaims) -> String {
        encode(&Header::new(Algorithm::HS256), claims, &EncodingKey::from_secret(TEST_SECRET.as_bytes()))
            .expect("token should encode")
    }

    fn unix_now() -> i64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("clock before epoch")
            .as_secs() as i64
    }

    #[tokio::test]
    async fn local_verifier_decodes_valid_token() {
        let user_id = Uuid::new_v4();
        let token = sign(&TestClaims {
            sub: user_id.to_string(),
            username: Some("ada".into()),
            email: None,
            exp: unix_now() + 900,
        });

        let verifier = AuthVerifier::local(TEST_SECRET).unwrap();
        let identity = verifier.verify(&token).await.unwrap();

        assert_eq!(identity.user_id, user_id);
        assert_eq!(identity.username.as_deref(), Some("ada"));
    }

    #[tokio::test]
    async fn local_verifier_rejects_expired_token() {
        let token = sign(&TestClaims {
            sub: Uuid::new_v4().to_string(),
            username: None,
            email: None,
            exp: unix_now() - 10,
        });

        let verifier = AuthVerifier::local(TEST_SECRET).unwrap();
        assert!(verifier.verify(&token).await.is_err());
    }

    #[tokio::test]
    async fn local_verifier_rejects_non_uuid_subject() {
        let token = sign(&TestClaims {
            sub: "not-a-uuid".into(),
            username: None,
            email: None,
            exp: unix_now() + 900,
        });

        let verifier = AuthVerifier::local(TEST_SECRET).unwrap();
        assert!(verifier.verify(&token).await.is_err());
    }

    #[tokio::test]
    async fn empty_token_is_rejected_before_touching_either_backend() {
        let verifier = AuthVerifier::local(TEST_SECRET).unwrap();
        assert!(verifier.verify("").await.is_err());
    }

    #[tokio::test]
    async fn remote_cache_serves_repeated_lookups_without_expiring_within_ttl() {
        let verifier = RemoteIntrospectionVerifier::new("http://127.0.0.1:1").with_ttl(Duration::from_secs(60));
        let identity = Identity { user_id: Uuid::new_v4(), username: None, email: None };
        verifier.insert("cached-token".into(), identity.clone()).await;

        let cached = verifier.cache.read().await;
        let entry = cached.get("cached-token").expect("entry should be cached");
        assert_eq!(entry.identity, identity);
    }

    #[tokio::test]
    async fn remote_cache_evicts_oldest_entry_past_capacity() {
        let mut verifier =
            RemoteIntrospectionVerifier::new("http://127.0.0.1:1").with_ttl(Duration::from_secs(60));
        verifier.capacity = 2;

        verifier.insert("first".into(), Identity { user_id: Uuid::new_v4(), username: None, email: None }).await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        verifier.insert("second".into(), Identity { user_id: Uuid::new_v4(), username: None, email: None }).await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        verifier.insert("third".into(), Identity { user_id: Uuid::new_v4(), username: None, email: None }).await;

        let cached = verifier.cache.read().await;
        assert_eq!(cached.len(), 2);
        assert!(!cached.contains_key("first"));
        assert!(cached.contains_key("third"));
    }
}
