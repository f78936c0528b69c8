//! # Token Manager
//!
//! OAuth2 client-credentials token management for every authenticated call
//! the edge node makes (REST, realtime upgrade, artifact download).
//!
//! ## Authentication Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Client Credentials Flow                            │
//! │                                                                         │
//! │  ┌────────────────┐                          ┌─────────────────┐       │
//! │  │  TokenManager  │                          │  Auth Server    │       │
//! │  └───────┬────────┘                          └────────┬────────┘       │
//! │          │                                            │                 │
//! │          │  1. POST (form)                            │                 │
//! │          │     grant_type=client_credentials          │                 │
//! │          │     client_id, client_secret, scope        │                 │
//! │          │───────────────────────────────────────────►│                 │
//! │          │  2. 200 {access_token, expires_in}         │                 │
//! │          │◄───────────────────────────────────────────│                 │
//! │          │                                            │                 │
//! │          │  [Later: less than 5 minutes left]         │                 │
//! │          │                                            │                 │
//! │          │  3. Same request again (no refresh token)  │                 │
//! │          │───────────────────────────────────────────►│                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Token Storage
//! Tokens are kept in memory only. Reads share a lock; a refresh takes the
//! write lock and re-checks, so concurrent callers trigger a single request.

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::CloudSettings;
use crate::error::{SyncError, SyncResult};

/// Margin before token expiration to trigger refresh (5 minutes).
pub const REFRESH_MARGIN_SECS: u64 = 300;

/// Lifetime assumed when the auth server omits `expires_in`.
pub const DEFAULT_EXPIRES_IN_SECS: u64 = 3600;

// =============================================================================
// Token
// =============================================================================

/// Bearer token with its local expiry instant.
#[derive(Debug, Clone)]
pub struct AuthToken {
    pub access_token: String,
    pub expires_at: Instant,
}

impl AuthToken {
    /// Check if the token is expired or about to expire
    pub fn needs_refresh(&self) -> bool {
        let margin = Duration::from_secs(REFRESH_MARGIN_SECS);
        Instant::now() + margin >= self.expires_at
    }

    /// Check if the token is completely expired (no grace period)
    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }

    /// Get remaining valid time
    pub fn remaining_secs(&self) -> u64 {
        self.expires_at
            .saturating_duration_since(Instant::now())
            .as_secs()
    }

    /// `Authorization` header value.
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.access_token)
    }
}

/// Raw result of a token request.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub access_token: String,
    pub expires_in: Option<u64>,
}

// =============================================================================
// Token Provider
// =============================================================================

/// Performs one token request. No retries; the caller decides.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn request_token(&self) -> SyncResult<IssuedToken>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

/// OAuth2 client-credentials grant against the configured auth URL.
pub struct ClientCredentials {
    http: reqwest::Client,
    auth_url: String,
    client_id: String,
    client_secret: String,
    scope: String,
}

impl ClientCredentials {
    pub fn new(http: reqwest::Client, settings: &CloudSettings) -> Self {
        ClientCredentials {
            http,
            auth_url: settings.auth_url.clone(),
            client_id: settings.client_id.clone(),
            client_secret: settings.client_secret.clone(),
            scope: settings.scope.clone(),
        }
    }
}

#[async_trait]
impl TokenProvider for ClientCredentials {
    async fn request_token(&self) -> SyncResult<IssuedToken> {
        debug!(url = %self.auth_url, client_id = %self.client_id, "Requesting access token");

        let form = [
            ("grant_type", "client_credentials"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("scope", self.scope.as_str()),
        ];

        let resp = self
            .http
            .post(&self.auth_url)
            .form(&form)
            .send()
            .await
            .map_err(|e| SyncError::AuthFailed(e.to_string()))?;

        let status = resp.status();
        if status != reqwest::StatusCode::OK {
            let body = resp.text().await.unwrap_or_default();
            return Err(SyncError::AuthRejected {
                status: status.as_u16(),
                body,
            });
        }

        let token: TokenResponse = resp
            .json()
            .await
            .map_err(|e| SyncError::AuthFailed(format!("malformed token response: {}", e)))?;

        Ok(IssuedToken {
            access_token: token.access_token,
            expires_in: token.expires_in,
        })
    }
}

// =============================================================================
// Token Manager
// =============================================================================

/// Caches the current token and refreshes it inside the 5-minute margin.
pub struct TokenManager {
    provider: Arc<dyn TokenProvider>,
    token: RwLock<Option<AuthToken>>,
    refreshes: AtomicU64,
}

impl TokenManager {
    pub fn new(provider: Arc<dyn TokenProvider>) -> Self {
        TokenManager {
            provider,
            token: RwLock::new(None),
            refreshes: AtomicU64::new(0),
        }
    }

    /// Returns a token valid for at least the refresh margin.
    ///
    /// ## Flow
    /// 1. Cached token outside the margin → return it
    /// 2. Otherwise take the write lock, re-check, request a new one
    /// 3. Request failure → error, cached token left untouched
    pub async fn get_token(&self) -> SyncResult<AuthToken> {
        {
            let guard = self.token.read().await;
            if let Some(token) = guard.as_ref() {
                if !token.needs_refresh() {
                    return Ok(token.clone());
                }
            }
        }

        let mut guard = self.token.write().await;

        // Double-check after acquiring write lock
        if let Some(token) = guard.as_ref() {
            if !token.needs_refresh() {
                return Ok(token.clone());
            }
        }

        let issued = match self.provider.request_token().await {
            Ok(issued) => issued,
            Err(e) => {
                warn!(error = %e, "Access token request failed");
                return Err(e);
            }
        };

        let expires_in = issued.expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS);
        let token = AuthToken {
            access_token: issued.access_token,
            expires_at: Instant::now() + Duration::from_secs(expires_in),
        };
        self.refreshes.fetch_add(1, Ordering::Relaxed);
        info!(expires_in_secs = expires_in, "Access token refreshed");

        *guard = Some(token.clone());
        Ok(token)
    }

    /// `Authorization` header value, or `None` when no token can be had.
    pub async fn auth_header(&self) -> Option<String> {
        self.get_token().await.ok().map(|t| t.bearer())
    }

    /// Current token without triggering a refresh.
    pub async fn current_token(&self) -> Option<AuthToken> {
        self.token.read().await.clone()
    }

    /// Drops the cached token so the next call requests a new one.
    pub async fn invalidate(&self) {
        *self.token.write().await = None;
    }

    /// Number of successful token requests so far.
    pub fn refresh_count(&self) -> u64 {
        self.refreshes.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct CountingProvider {
        calls: AtomicUsize,
        expires_in: Option<u64>,
        delay: Duration,
        fail: bool,
    }

    impl CountingProvider {
        fn new(expires_in: Option<u64>) -> Self {
            CountingProvider {
                calls: AtomicUsize::new(0),
                expires_in,
                delay: Duration::ZERO,
                fail: false,
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TokenProvider for CountingProvider {
        async fn request_token(&self) -> SyncResult<IssuedToken> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self.fail {
                return Err(SyncError::AuthRejected {
                    status: 401,
                    body: "invalid_client".into(),
                });
            }
            Ok(IssuedToken {
                access_token: format!("token-{}", n),
                expires_in: self.expires_in,
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_token_needs_refresh() {
        let token = AuthToken {
            access_token: "test".to_string(),
            expires_at: Instant::now() + Duration::from_secs(60),
        };
        assert!(token.needs_refresh());
        assert!(!token.is_expired());

        let token = AuthToken {
            access_token: "test".to_string(),
            expires_at: Instant::now() + Duration::from_secs(3600),
        };
        assert!(!token.needs_refresh());
        assert_eq!(token.remaining_secs(), 3600);
        assert_eq!(token.bearer(), "Bearer test");
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_refresh_when_crossing_margin() {
        let provider = Arc::new(CountingProvider::new(Some(3600)));
        let manager = TokenManager::new(provider.clone());

        let first = manager.get_token().await.unwrap();
        assert_eq!(first.access_token, "token-1");
        assert_eq!(provider.calls(), 1);

        // 310s left: still outside the margin
        tokio::time::advance(Duration::from_secs(3290)).await;
        assert_eq!(manager.get_token().await.unwrap().access_token, "token-1");
        assert_eq!(provider.calls(), 1);

        // 290s left: inside the margin, exactly one refresh
        tokio::time::advance(Duration::from_secs(20)).await;
        let refreshed = manager.get_token().await.unwrap();
        assert_eq!(refreshed.access_token, "token-2");
        assert!(refreshed.remaining_secs() >= REFRESH_MARGIN_SECS);
        assert_eq!(manager.get_token().await.unwrap().access_token, "token-2");
        assert_eq!(provider.calls(), 2);
        assert_eq!(manager.refresh_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_expires_in_defaults_to_an_hour() {
        let manager = TokenManager::new(Arc::new(CountingProvider::new(None)));
        let token = manager.get_token().await.unwrap();
        assert_eq!(token.remaining_secs(), DEFAULT_EXPIRES_IN_SECS);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_share_one_refresh() {
        let provider = Arc::new(CountingProvider {
            delay: Duration::from_millis(200),
            ..CountingProvider::new(Some(3600))
        });
        let manager = Arc::new(TokenManager::new(provider.clone()));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let manager = manager.clone();
            tasks.push(tokio::spawn(async move { manager.get_token().await }));
        }
        for task in tasks {
            assert_eq!(task.await.unwrap().unwrap().access_token, "token-1");
        }
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn test_failure_yields_no_token_and_no_header() {
        let provider = Arc::new(CountingProvider {
            fail: true,
            ..CountingProvider::new(Some(3600))
        });
        let manager = TokenManager::new(provider.clone());

        let err = manager.get_token().await.unwrap_err();
        assert!(err.is_auth_error());
        assert_eq!(manager.auth_header().await, None);
        assert!(manager.current_token().await.is_none());
        // No internal retry
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test]
    async fn test_invalidate_forces_new_request() {
        let provider = Arc::new(CountingProvider::new(Some(3600)));
        let manager = TokenManager::new(provider.clone());

        assert_eq!(manager.auth_header().await.as_deref(), Some("Bearer token-1"));
        manager.invalidate().await;
        assert_eq!(manager.auth_header().await.as_deref(), Some("Bearer token-2"));
    }
}
