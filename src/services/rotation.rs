//! Key rotation executor
//!
//! Runs an operation against a freshly built client, moving to the next API
//! key whenever an attempt fails. Each key is tried at most once per call, so
//! a call makes at most `pool.len()` attempts.

use crate::error::RotationError;
use crate::services::key_pool::KeyPool;
use crate::utils::{mask_key, truncate_str};
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Longest error message (in characters) copied into a log line
const MAX_LOGGED_ERROR_CHARS: usize = 300;

/// Decides whether a failed attempt should rotate to the next key
pub type RotationPolicy<E> = Arc<dyn Fn(&E) -> bool + Send + Sync>;

/// Result of a rotating call
#[derive(Debug)]
pub struct RotationOutcome<T, E> {
    /// The final result (success or last error)
    pub result: Result<T, RotationError<E>>,

    /// Number of attempts made
    pub attempts: usize,

    /// Number of key rotations performed during the call
    pub rotations: usize,
}

/// Executes calls with API key rotation
pub struct RotationExecutor<E> {
    pool: Arc<KeyPool>,
    policy: Option<RotationPolicy<E>>,
}

impl<E> Clone for RotationExecutor<E> {
    fn clone(&self) -> Self {
        Self {
            pool: Arc::clone(&self.pool),
            policy: self.policy.clone(),
        }
    }
}

impl<E> fmt::Debug for RotationExecutor<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RotationExecutor")
            .field("pool", &self.pool)
            .field("has_policy", &self.policy.is_some())
            .finish()
    }
}

impl<E> RotationExecutor<E>
where
    E: fmt::Display,
{
    /// Create an executor that rotates on every error
    pub fn new(pool: Arc<KeyPool>) -> Self {
        Self { pool, policy: None }
    }

    /// Only rotate on errors accepted by `policy`
    ///
    /// Errors the policy rejects are returned immediately and the key stays
    /// current.
    pub fn with_rotation_policy<P>(mut self, policy: P) -> Self
    where
        P: Fn(&E) -> bool + Send + Sync + 'static,
    {
        self.policy = Some(Arc::new(policy));
        self
    }

    /// Get the shared key pool
    pub fn pool(&self) -> &Arc<KeyPool> {
        &self.pool
    }

    /// Run `operation` with rotation and return its result
    ///
    /// # Arguments
    /// * `build_client` - Builds a new client for the given key, once per attempt
    /// * `operation` - The call to perform with that client
    pub async fn execute<C, T, B, F, Fut>(
        &self,
        build_client: B,
        operation: F,
    ) -> Result<T, RotationError<E>>
    where
        B: FnMut(&str) -> Result<C, E>,
        F: FnMut(C) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.execute_with_outcome(build_client, operation).await.result
    }

    /// Run `operation` with rotation and report attempt statistics
    pub async fn execute_with_outcome<C, T, B, F, Fut>(
        &self,
        mut build_client: B,
        mut operation: F,
    ) -> RotationOutcome<T, E>
    where
        B: FnMut(&str) -> Result<C, E>,
        F: FnMut(C) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let max_attempts = self.pool.len();
        let mut attempts = 0;
        let mut rotations = 0;
        let mut last_error: Option<E> = None;

        for _ in 0..max_attempts {
            let key = self.pool.current().to_string();
            attempts += 1;

            // A client that fails to build counts as a failed attempt
            let outcome = match build_client(&key) {
                Ok(client) => operation(client).await,
                Err(err) => Err(err),
            };

            match outcome {
                Ok(value) => {
                    if rotations > 0 {
                        tracing::info!(
                            key = %mask_key(&key),
                            attempts,
                            "Call succeeded after key rotation"
                        );
                    }
                    return RotationOutcome {
                        result: Ok(value),
                        attempts,
                        rotations,
                    };
                }
                Err(err) => {
                    let message = err.to_string();
                    tracing::warn!(
                        key = %mask_key(&key),
                        attempt = attempts,
                        max_attempts,
                        error = %truncate_str(&message, MAX_LOGGED_ERROR_CHARS),
                        "Call failed with API key"
                    );

                    if !self.should_rotate(&err) {
                        tracing::warn!(
                            key = %mask_key(&key),
                            "Error is not eligible for rotation, giving up"
                        );
                        return RotationOutcome {
                            result: Err(RotationError::Provider(err)),
                            attempts,
                            rotations,
                        };
                    }

                    self.pool.advance();
                    rotations += 1;
                    last_error = Some(err);
                }
            }
        }

        let result = match last_error {
            Some(err) => {
                tracing::error!(attempts, "All API keys failed");
                Err(RotationError::Provider(err))
            }
            None => Err(RotationError::Exhausted),
        };

        RotationOutcome {
            result,
            attempts,
            rotations,
        }
    }

    fn should_rotate(&self, err: &E) -> bool {
        self.policy.as_ref().map_or(true, |policy| policy(err))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    /// Operation that fails for the listed keys and echoes any other key
    async fn echo_unless(key: String, failing: &HashSet<&str>) -> Result<String, String> {
        if failing.contains(key.as_str()) {
            Err(format!("quota exceeded for {}", key))
        } else {
            Ok(format!("ok:{}", key))
        }
    }

    fn pool(keys: &[&str]) -> Arc<KeyPool> {
        Arc::new(KeyPool::new(keys).unwrap())
    }

    #[tokio::test]
    async fn test_first_attempt_success_never_rotates() {
        let pool = pool(&["k1", "k2", "k3"]);
        let executor: RotationExecutor<String> = RotationExecutor::new(Arc::clone(&pool));
        let failing = HashSet::new();

        let outcome = executor
            .execute_with_outcome(|key| Ok(key.to_string()), |key| echo_unless(key, &failing))
            .await;

        assert_eq!(outcome.result.unwrap(), "ok:k1");
        assert_eq!(outcome.attempts, 1);
        assert_eq!(outcome.rotations, 0);
        assert_eq!(pool.rotations(), 0);
        assert_eq!(pool.current(), "k1");
    }

    #[tokio::test]
    async fn test_success_after_k_failures() {
        let pool = pool(&["k1", "k2", "k3", "k4"]);
        let executor: RotationExecutor<String> = RotationExecutor::new(Arc::clone(&pool));
        let failing: HashSet<&str> = ["k1", "k2"].into_iter().collect();

        let outcome = executor
            .execute_with_outcome(|key| Ok(key.to_string()), |key| echo_unless(key, &failing))
            .await;

        assert_eq!(outcome.result.unwrap(), "ok:k3");
        assert_eq!(outcome.attempts, 3);
        assert_eq!(outcome.rotations, 2);
        assert_eq!(pool.rotations(), 2);
        // The working key stays current for the next call
        assert_eq!(pool.current(), "k3");
    }

    #[tokio::test]
    async fn test_all_keys_fail_returns_last_error() {
        let pool = pool(&["k1", "k2", "k3"]);
        let executor: RotationExecutor<String> = RotationExecutor::new(Arc::clone(&pool));
        let failing: HashSet<&str> = ["k1", "k2", "k3"].into_iter().collect();

        let outcome = executor
            .execute_with_outcome(|key| Ok(key.to_string()), |key| echo_unless(key, &failing))
            .await;

        let err = outcome.result.unwrap_err();
        assert_eq!(err.to_string(), "quota exceeded for k3");
        assert_eq!(err.into_inner(), Some("quota exceeded for k3".to_string()));
        assert_eq!(outcome.attempts, 3);
        assert_eq!(pool.rotations(), 3);
        // A full cycle lands back on the first key
        assert_eq!(pool.current(), "k1");
    }

    #[tokio::test]
    async fn test_duplicate_keys_scenario() {
        let pool = pool(&["A", "A", "B", "C"]);
        assert_eq!(pool.len(), 3);
        let executor: RotationExecutor<String> = RotationExecutor::new(Arc::clone(&pool));
        let failing: HashSet<&str> = ["A", "B"].into_iter().collect();
        let mut builds = Vec::new();

        let result = executor
            .execute(
                |key| {
                    builds.push(key.to_string());
                    Ok(key.to_string())
                },
                |key| echo_unless(key, &failing),
            )
            .await;

        assert_eq!(result.unwrap(), "ok:C");
        assert_eq!(builds, vec!["A", "B", "C"]);
        assert_eq!(pool.rotations(), 2);
    }

    #[tokio::test]
    async fn test_build_failure_rotates() {
        let pool = pool(&["bad", "good"]);
        let executor: RotationExecutor<String> = RotationExecutor::new(Arc::clone(&pool));
        let failing = HashSet::new();

        let outcome = executor
            .execute_with_outcome(
                |key| {
                    if key == "bad" {
                        Err("invalid key format".to_string())
                    } else {
                        Ok(key.to_string())
                    }
                },
                |key| echo_unless(key, &failing),
            )
            .await;

        assert_eq!(outcome.result.unwrap(), "ok:good");
        assert_eq!(outcome.rotations, 1);
    }

    #[tokio::test]
    async fn test_rotation_policy_stops_on_fatal_error() {
        let pool = pool(&["k1", "k2", "k3"]);
        let executor: RotationExecutor<String> = RotationExecutor::new(Arc::clone(&pool))
            .with_rotation_policy(|err: &String| err.contains("quota"));
        let mut calls = 0;

        let outcome = executor
            .execute_with_outcome(
                |key| Ok(key.to_string()),
                |_key| {
                    calls += 1;
                    async { Err::<String, _>("malformed request".to_string()) }
                },
            )
            .await;

        assert_eq!(
            outcome.result.unwrap_err().to_string(),
            "malformed request"
        );
        assert_eq!(outcome.attempts, 1);
        assert_eq!(calls, 1);
        assert_eq!(pool.rotations(), 0);
        assert_eq!(pool.current(), "k1");
    }

    #[tokio::test]
    async fn test_rotation_policy_still_rotates_retryable_errors() {
        let pool = pool(&["k1", "k2"]);
        let executor: RotationExecutor<String> = RotationExecutor::new(Arc::clone(&pool))
            .with_rotation_policy(|err: &String| err.contains("quota"));
        let failing: HashSet<&str> = ["k1"].into_iter().collect();

        let result = executor
            .execute(|key| Ok(key.to_string()), |key| echo_unless(key, &failing))
            .await;

        assert_eq!(result.unwrap(), "ok:k2");
        assert_eq!(pool.rotations(), 1);
    }

    #[tokio::test]
    async fn test_next_call_starts_from_rotated_key() {
        let pool = pool(&["k1", "k2"]);
        let executor: RotationExecutor<String> = RotationExecutor::new(Arc::clone(&pool));
        let failing: HashSet<&str> = ["k1"].into_iter().collect();

        executor
            .execute(|key| Ok(key.to_string()), |key| echo_unless(key, &failing))
            .await
            .unwrap();

        let mut first_key = None;
        executor
            .execute(
                |key| {
                    first_key.get_or_insert_with(|| key.to_string());
                    Ok(key.to_string())
                },
                |key| echo_unless(key, &failing),
            )
            .await
            .unwrap();

        assert_eq!(first_key.as_deref(), Some("k2"));
    }
}
