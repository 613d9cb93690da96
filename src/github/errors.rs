use chrono::{DateTime, Utc};

/// Error kinds the gateway hands to callers. Classification drives the retry
/// policy: transient errors back off, rate limits sleep until reset, auth
/// failures refresh the installation token once.
#[derive(Debug, thiserror::Error)]
pub enum GitHubError {
    #[error("rate limited, reset at {reset_at:?}")]
    RateLimited { reset_at: Option<DateTime<Utc>> },
    #[error("transient GitHub failure: {0}")]
    Transient(String),
    #[error("authentication failure: {0}")]
    AuthFailure(String),
    #[error("validation failed: {0}")]
    ValidationFailed(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("GitHub API error: {0}")]
    Api(#[from] octocrab::Error),
}

impl GitHubError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, GitHubError::NotFound(_))
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, GitHubError::Transient(_))
    }
}

/// Map an octocrab error onto the retryable kinds.
pub fn classify(err: octocrab::Error) -> GitHubError {
    classify_ref(&err).unwrap_or(GitHubError::Api(err))
}

fn classify_ref(err: &octocrab::Error) -> Option<GitHubError> {
    match err {
        octocrab::Error::GitHub { source, .. } => {
            let status = source.status_code.as_u16();
            match status {
                401 => Some(GitHubError::AuthFailure(source.message.clone())),
                403 if source.message.to_lowercase().contains("rate limit") => {
                    // The reset time is resolved by the caller via the
                    // rate-limit endpoint; the error payload does not carry it.
                    Some(GitHubError::RateLimited { reset_at: None })
                }
                403 => Some(GitHubError::AuthFailure(source.message.clone())),
                404 => Some(GitHubError::NotFound(source.message.clone())),
                422 => Some(GitHubError::ValidationFailed(source.message.clone())),
                500 | 502 | 503 | 504 => Some(GitHubError::Transient(format!(
                    "HTTP {status}: {}",
                    source.message
                ))),
                _ => None,
            }
        }
        octocrab::Error::Http { source, .. } => Some(GitHubError::Transient(source.to_string())),
        other => {
            // Connection-level failures surface under transport variants;
            // classify by message rather than pinning the exact variant.
            let text = other.to_string();
            let lower = text.to_lowercase();
            let transient = lower.contains("connection")
                || lower.contains("timed out")
                || lower.contains("timeout")
                || lower.contains("reset by peer")
                || lower.contains("broken pipe");
            transient.then(|| GitHubError::Transient(text))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_predicate() {
        assert!(GitHubError::NotFound("gone".into()).is_not_found());
        assert!(!GitHubError::Transient("502".into()).is_not_found());
    }

    #[test]
    fn transient_predicate() {
        assert!(GitHubError::Transient("502".into()).is_transient());
        assert!(!GitHubError::ValidationFailed("422".into()).is_transient());
    }
}
