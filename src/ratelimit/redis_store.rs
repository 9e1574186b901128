//! Redis-backed counter store.
//!
//! The increment-and-expire step runs as a Lua script on the Redis server so
//! that concurrent first requests cannot race between `INCR` and `EXPIRE`.
//! The script is invoked by digest; when the server has lost it (restart,
//! `SCRIPT FLUSH`, failover to a fresh replica) the full body is re-submitted
//! once, which also registers it again.

use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::{ConnectionLike, ConnectionManager};
use redis::{ErrorKind, RedisResult, Script};
use tokio::sync::OnceCell;
use tracing::{debug, trace, warn};

use super::key::RateLimitKey;
use super::store::AtomicCounterStore;
use crate::config::RedisConfig;
use crate::error::{Result, WindowLimitError};

const INCREMENT_SCRIPT_SOURCE: &str = r#"
local current
current = redis.call("INCR", KEYS[1])
if tonumber(current) == 1 then
    redis.call("EXPIRE", KEYS[1], ARGV[1])
end
return current
"#;

/// Digest computed once per process and shared by every store.
static INCREMENT_SCRIPT: LazyLock<Script> = LazyLock::new(|| Script::new(INCREMENT_SCRIPT_SOURCE));

/// A counter store backed by a Redis server.
///
/// The connection is opened lazily on first use and shared by all callers;
/// a failed connect is retried on the next call.
pub struct RedisCounterStore {
    /// Client used to open the connection
    client: redis::Client,
    /// Multiplexed, auto-reconnecting connection
    connection: OnceCell<ConnectionManager>,
    /// Bound on one increment including connection setup
    response_timeout: Duration,
}

impl RedisCounterStore {
    /// Create a store without connecting.
    ///
    /// Fails only if the settings themselves are invalid.
    pub fn new(config: &RedisConfig) -> Result<Self> {
        let client = redis::Client::open(config.url.as_str()).map_err(|e| {
            WindowLimitError::InvalidConfiguration(format!("invalid redis url: {}", e))
        })?;

        if config.response_timeout_ms == 0 {
            return Err(WindowLimitError::InvalidConfiguration(
                "response_timeout_ms must be positive".to_string(),
            ));
        }

        Ok(Self {
            client,
            connection: OnceCell::new(),
            response_timeout: config.response_timeout(),
        })
    }

    /// Create a store and open its connection up front.
    pub async fn connect(config: &RedisConfig) -> Result<Self> {
        let store = Self::new(config)?;
        store.connection().await?;
        Ok(store)
    }

    /// The digest the increment script is invoked by.
    pub fn script_hash() -> &'static str {
        INCREMENT_SCRIPT.get_hash()
    }

    async fn connection(&self) -> Result<ConnectionManager> {
        let connection = self
            .connection
            .get_or_try_init(|| async {
                debug!(
                    addr = ?self.client.get_connection_info().addr,
                    "Opening redis connection"
                );
                ConnectionManager::new(self.client.clone()).await
            })
            .await
            .map_err(|e| {
                warn!(error = %e, "Failed to connect to redis");
                WindowLimitError::from(e)
            })?;
        Ok(connection.clone())
    }

    async fn increment(&self, key: &RateLimitKey, window_size_secs: u64) -> Result<u64> {
        let mut connection = self.connection().await?;
        run_increment_script(&mut connection, key, window_size_secs).await
    }
}

/// Invoke the increment script by digest, re-submitting the full body once
/// if the server reports it missing.
async fn run_increment_script<C>(connection: &mut C, key: &RateLimitKey, window_size_secs: u64) -> Result<u64>
where
    C: ConnectionLike + Send,
{
    let result: RedisResult<u64> = redis::cmd("EVALSHA")
        .arg(RedisCounterStore::script_hash())
        .arg(1)
        .arg(key.as_str())
        .arg(window_size_secs)
        .query_async(&mut *connection)
        .await;

    match result {
        Ok(count) => Ok(count),
        Err(e) if e.kind() == ErrorKind::NoScriptError => {
            debug!(
                hash = RedisCounterStore::script_hash(),
                "Increment script missing on server, re-submitting"
            );
            let count: u64 = redis::cmd("EVAL")
                .arg(INCREMENT_SCRIPT_SOURCE)
                .arg(1)
                .arg(key.as_str())
                .arg(window_size_secs)
                .query_async(&mut *connection)
                .await?;
            Ok(count)
        }
        Err(e) => Err(e.into()),
    }
}

impl std::fmt::Debug for RedisCounterStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisCounterStore")
            .field("addr", &self.client.get_connection_info().addr)
            .field("connected", &self.connection.initialized())
            .field("response_timeout", &self.response_timeout)
            .finish()
    }
}

#[async_trait]
impl AtomicCounterStore for RedisCounterStore {
    async fn increment_and_expire(&self, key: &RateLimitKey, window_size_secs: u64) -> Result<u64> {
        let count = tokio::time::timeout(self.response_timeout, self.increment(key, window_size_secs))
            .await
            .map_err(|_| {
                WindowLimitError::BackendUnavailable(format!(
                    "no reply within {:?}",
                    self.response_timeout
                ))
            })??;

        trace!(key = %key, count = count, "Incremented redis counter");
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::{FixedWindowRateLimiter, KeyBuilder, Verdict, WindowConfig};
    use redis::Value;
    use redis_test::{MockCmd, MockRedisConnection};

    /// A store that runs the increment script over a scripted mock connection.
    struct ScriptedStore {
        connection: tokio::sync::Mutex<MockRedisConnection>,
    }

    impl ScriptedStore {
        fn new(commands: Vec<MockCmd>) -> Self {
            Self {
                connection: tokio::sync::Mutex::new(MockRedisConnection::new(commands)),
            }
        }
    }

    #[async_trait]
    impl AtomicCounterStore for ScriptedStore {
        async fn increment_and_expire(&self, key: &RateLimitKey, window_size_secs: u64) -> Result<u64> {
            let mut connection = self.connection.lock().await;
            run_increment_script(&mut *connection, key, window_size_secs).await
        }
    }

    fn evalsha(key: &RateLimitKey, window_size_secs: u64) -> redis::Cmd {
        let mut cmd = redis::cmd("EVALSHA");
        cmd.arg(RedisCounterStore::script_hash())
            .arg(1)
            .arg(key.as_str())
            .arg(window_size_secs);
        cmd
    }

    fn eval(key: &RateLimitKey, window_size_secs: u64) -> redis::Cmd {
        let mut cmd = redis::cmd("EVAL");
        cmd.arg(INCREMENT_SCRIPT_SOURCE)
            .arg(1)
            .arg(key.as_str())
            .arg(window_size_secs);
        cmd
    }

    fn noscript() -> redis::RedisError {
        redis::RedisError::from((ErrorKind::NoScriptError, "NOSCRIPT No matching script"))
    }

    fn unreachable_config() -> RedisConfig {
        RedisConfig {
            // Port 1 never hosts a redis server.
            url: "redis://127.0.0.1:1".to_string(),
            response_timeout_ms: 250,
        }
    }

    #[test]
    fn test_script_hash_is_stable() {
        let hash = RedisCounterStore::script_hash();
        assert_eq!(hash.len(), 40);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(hash, Script::new(INCREMENT_SCRIPT_SOURCE).get_hash());
    }

    #[test]
    fn test_invalid_url_rejected() {
        let config = RedisConfig {
            url: "not a url".to_string(),
            ..RedisConfig::default()
        };
        let result = RedisCounterStore::new(&config);
        assert!(matches!(result, Err(WindowLimitError::InvalidConfiguration(_))));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let config = RedisConfig {
            response_timeout_ms: 0,
            ..RedisConfig::default()
        };
        let result = RedisCounterStore::new(&config);
        assert!(matches!(result, Err(WindowLimitError::InvalidConfiguration(_))));
    }

    #[tokio::test]
    async fn test_new_does_not_connect() {
        let store = RedisCounterStore::new(&unreachable_config()).unwrap();
        assert!(!store.connection.initialized());
    }

    #[tokio::test]
    async fn test_unreachable_server_is_unavailable() {
        let store = RedisCounterStore::new(&unreachable_config()).unwrap();
        let key = KeyBuilder::new("test:", false).build("user", None);

        let result = store.increment_and_expire(&key, 60).await;
        assert!(matches!(result, Err(WindowLimitError::BackendUnavailable(_))));
    }

    #[tokio::test]
    async fn test_limiter_fails_open_on_unreachable_server() {
        let store = RedisCounterStore::new(&unreachable_config()).unwrap();
        let limiter =
            FixedWindowRateLimiter::new(store, WindowConfig::new(60, 1).unwrap(), KeyBuilder::new("test:", false));

        for _ in 0..3 {
            assert_eq!(limiter.check_and_consume("user", None).await, Verdict::Admit);
        }
    }

    #[tokio::test]
    async fn test_cached_script_used_by_digest() {
        let key = KeyBuilder::new("test:", false).build("user", None);
        let mut connection = MockRedisConnection::new(vec![MockCmd::new(
            evalsha(&key, 60),
            Ok::<_, redis::RedisError>(Value::Int(4)),
        )]);

        let count = run_increment_script(&mut connection, &key, 60).await.unwrap();
        assert_eq!(count, 4);
    }

    #[tokio::test]
    async fn test_missing_script_is_resubmitted() {
        let key = KeyBuilder::new("test:", false).build("user", None);
        let mut connection = MockRedisConnection::new(vec![
            MockCmd::new(evalsha(&key, 60), Err::<Value, _>(noscript())),
            MockCmd::new(eval(&key, 60), Ok::<_, redis::RedisError>(Value::Int(1))),
        ]);

        let count = run_increment_script(&mut connection, &key, 60).await.unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_failed_resubmission_surfaces_error() {
        let key = KeyBuilder::new("test:", false).build("user", None);
        let mut connection = MockRedisConnection::new(vec![
            MockCmd::new(evalsha(&key, 60), Err::<Value, _>(noscript())),
            MockCmd::new(
                eval(&key, 60),
                Err::<Value, _>(redis::RedisError::from((
                    ErrorKind::ResponseError,
                    "ERR Error running script",
                ))),
            ),
        ]);

        let result = run_increment_script(&mut connection, &key, 60).await;
        assert!(matches!(result, Err(WindowLimitError::Backend(_))));
    }

    #[tokio::test]
    async fn test_limiter_admits_when_resubmission_fails() {
        let keys = KeyBuilder::new("test:", false);
        let key = keys.build("user", None);
        let store = ScriptedStore::new(vec![
            MockCmd::new(evalsha(&key, 60), Err::<Value, _>(noscript())),
            MockCmd::new(eval(&key, 60), Err::<Value, _>(noscript())),
        ]);
        let limiter = FixedWindowRateLimiter::new(store, WindowConfig::new(60, 1).unwrap(), keys);

        assert_eq!(limiter.check_and_consume("user", None).await, Verdict::Admit);
    }

    #[tokio::test]
    async fn test_limiter_rejects_over_quota_after_resubmission() {
        let keys = KeyBuilder::new("test:", false);
        let key = keys.build("user", None);
        let store = ScriptedStore::new(vec![
            MockCmd::new(evalsha(&key, 60), Err::<Value, _>(noscript())),
            MockCmd::new(eval(&key, 60), Ok::<_, redis::RedisError>(Value::Int(2))),
        ]);
        let limiter = FixedWindowRateLimiter::new(store, WindowConfig::new(60, 1).unwrap(), keys);

        assert_eq!(limiter.check_and_consume("user", None).await, Verdict::Reject);
    }

    /// Runs against a live server: `REDIS_URL=redis://127.0.0.1:6379 cargo test -- --ignored`
    #[tokio::test]
    #[ignore]
    async fn test_live_increment_and_script_reload() {
        let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
        let config = RedisConfig {
            url,
            response_timeout_ms: 1000,
        };
        let store = RedisCounterStore::connect(&config).await.unwrap();
        let key = KeyBuilder::new("windowlimit-test:", false)
            .build(&uuid::Uuid::new_v4().to_string(), None);

        assert_eq!(store.increment_and_expire(&key, 30).await.unwrap(), 1);
        assert_eq!(store.increment_and_expire(&key, 30).await.unwrap(), 2);

        let mut connection = store.connection().await.unwrap();
        let ttl: i64 = redis::cmd("TTL")
            .arg(key.as_str())
            .query_async(&mut connection)
            .await
            .unwrap();
        assert!(ttl > 0 && ttl <= 30, "unexpected ttl {}", ttl);

        // Drop the cached script; the next call must re-submit it.
        let _: () = redis::cmd("SCRIPT")
            .arg("FLUSH")
            .query_async(&mut connection)
            .await
            .unwrap();
        assert_eq!(store.increment_and_expire(&key, 30).await.unwrap(), 3);

        let _: () = redis::cmd("DEL")
            .arg(key.as_str())
            .query_async(&mut connection)
            .await
            .unwrap();
    }
}
