use std::future::Future;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use governor::{DefaultDirectRateLimiter, Jitter, Quota, RateLimiter};
use octocrab::Octocrab;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::errors::{classify, GitHubError};
use super::retry::RetryPolicy;

/// Short-lived token used for both API calls and authenticated git pushes.
#[derive(Debug, Clone)]
pub struct InstallationToken {
    pub value: String,
    pub expires_at: DateTime<Utc>,
}

impl InstallationToken {
    fn from_env() -> Result<Self, GitHubError> {
        let value = std::env::var("GITFIX_GITHUB_TOKEN")
            .or_else(|_| std::env::var("GITHUB_TOKEN"))
            .map_err(|_| {
                GitHubError::AuthFailure(
                    "no GitHub token found; set GITFIX_GITHUB_TOKEN or GITHUB_TOKEN".to_string(),
                )
            })?;
        if value.trim().is_empty() {
            return Err(GitHubError::AuthFailure(
                "GitHub token is empty".to_string(),
            ));
        }
        Ok(Self {
            value,
            expires_at: Utc::now() + chrono::Duration::hours(1),
        })
    }
}

/// Typed wrapper over the GitHub REST API.
///
/// All calls flow through a client-side quota (authenticated GitHub allows
/// ~1.4 requests per second sustained; we allow short bursts) and the retry
/// policy: transient failures back off exponentially, a rate-limit response
/// sleeps until the advertised reset and retries once, an auth failure
/// refreshes the installation token once.
pub struct GitHubClient {
    octocrab: RwLock<Octocrab>,
    token: RwLock<InstallationToken>,
    limiter: Arc<DefaultDirectRateLimiter>,
    retry: RetryPolicy,
}

impl GitHubClient {
    pub fn new() -> Result<Self, GitHubError> {
        let token = InstallationToken::from_env()?;
        let octocrab = Self::build(&token)?;

        let quota = Quota::per_second(NonZeroU32::new(1).expect("nonzero"))
            .allow_burst(NonZeroU32::new(10).expect("nonzero"));

        Ok(Self {
            octocrab: RwLock::new(octocrab),
            token: RwLock::new(token),
            limiter: Arc::new(RateLimiter::direct(quota)),
            retry: RetryPolicy::default(),
        })
    }

    fn build(token: &InstallationToken) -> Result<Octocrab, GitHubError> {
        Octocrab::builder()
            .personal_token(token.value.clone())
            .build()
            .map_err(GitHubError::Api)
    }

    /// Current installation token, refreshed when within a minute of expiry.
    pub async fn installation_token(&self) -> Result<InstallationToken, GitHubError> {
        {
            let token = self.token.read().await;
            if token.expires_at - Utc::now() > chrono::Duration::seconds(60) {
                return Ok(token.clone());
            }
        }
        self.refresh_token().await?;
        Ok(self.token.read().await.clone())
    }

    async fn refresh_token(&self) -> Result<(), GitHubError> {
        let fresh = InstallationToken::from_env()?;
        let rebuilt = Self::build(&fresh)?;
        *self.octocrab.write().await = rebuilt;
        *self.token.write().await = fresh;
        debug!("installation token refreshed");
        Ok(())
    }

    /// When the API reports a rate limit without a reset time, ask the
    /// rate-limit endpoint for one.
    async fn resolve_rate_limit_reset(&self) -> Option<DateTime<Utc>> {
        let octocrab = self.octocrab.read().await.clone();
        match octocrab.ratelimit().get().await {
            Ok(limits) => Utc
                .timestamp_opt(limits.resources.core.reset as i64, 0)
                .single(),
            Err(e) => {
                warn!(error = %e, "failed to read rate-limit reset time");
                None
            }
        }
    }

    /// Run one GitHub operation under the quota and retry policy.
    pub(crate) async fn execute<T, F, Fut>(
        &self,
        operation: &str,
        mut call: F,
    ) -> Result<T, GitHubError>
    where
        F: FnMut(Octocrab) -> Fut,
        Fut: Future<Output = Result<T, octocrab::Error>>,
    {
        let mut attempt: u32 = 0;
        let mut rate_limit_retried = false;
        let mut token_refreshed = false;

        loop {
            self.limiter
                .until_ready_with_jitter(Jitter::up_to(Duration::from_millis(100)))
                .await;

            let octocrab = self.octocrab.read().await.clone();
            match call(octocrab).await {
                Ok(value) => return Ok(value),
                Err(err) => match classify(err) {
                    GitHubError::Transient(msg) => {
                        if self.retry.attempts_exhausted(attempt) {
                            return Err(GitHubError::Transient(msg));
                        }
                        let delay = self.retry.delay(attempt);
                        warn!(
                            operation,
                            attempt = attempt + 1,
                            delay_ms = delay.as_millis() as u64,
                            error = %msg,
                            "transient GitHub failure, backing off"
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    }
                    GitHubError::RateLimited { reset_at } => {
                        if rate_limit_retried {
                            return Err(GitHubError::RateLimited { reset_at });
                        }
                        rate_limit_retried = true;
                        let reset_at = match reset_at {
                            Some(t) => Some(t),
                            None => self.resolve_rate_limit_reset().await,
                        };
                        let wait = reset_at
                            .map(|t| (t - Utc::now()).to_std().unwrap_or_default())
                            .unwrap_or(Duration::from_secs(60));
                        warn!(
                            operation,
                            wait_secs = wait.as_secs(),
                            "rate limited, sleeping until reset"
                        );
                        tokio::time::sleep(wait).await;
                    }
                    GitHubError::AuthFailure(msg) => {
                        if token_refreshed {
                            return Err(GitHubError::AuthFailure(msg));
                        }
                        token_refreshed = true;
                        warn!(operation, "auth failure, refreshing installation token");
                        self.refresh_token().await?;
                    }
                    other => return Err(other),
                },
            }
        }
    }
}
