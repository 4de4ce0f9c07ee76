//! Durable queue abstraction over Redis Streams.
//!
//! Each event kind gets its own named stream plus a consumer group created
//! at id `0`, which together behave as a durable, non-exclusive queue:
//! entries survive a broker restart and are retained for delivery even when
//! published before any consumer attaches. Declaration is idempotent, so the
//! producer and every consumer declare independently before use.
//!
//! Consumption uses `NOACK`, the auto-acknowledge contract: a delivery is
//! considered handled the instant it is read, before processing runs
//! (at-most-once).

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use deadpool_redis::redis::streams::{StreamReadOptions, StreamReadReply};
use deadpool_redis::redis::{cmd, AsyncCommands, Value as RedisValue};
use deadpool_redis::{Config, Pool, Runtime};
use thiserror::Error;
use tracing::{debug, warn};

/// Maximum number of retries for the startup connectivity guard.
const MAX_CONNECT_RETRIES: u32 = 5;

/// Errors from broker operations.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("failed to create connection pool: {0}")]
    Pool(String),

    #[error("no broker connection available: {0}")]
    Connection(String),

    #[error("broker command failed: {0}")]
    Command(#[from] deadpool_redis::redis::RedisError),

    #[error("broker unreachable after {attempts} attempts: {last}")]
    Unreachable { attempts: u32, last: String },
}

/// A message read from a queue: the broker-assigned entry id and the
/// JSON-UTF8 payload.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub id: String,
    pub body: String,
}

/// Shared broker handle.
///
/// The pool is the shared broker connection; a checked-out connection is a
/// caller's exclusive channel and must not be used concurrently. `Broker`
/// itself is cheap to clone and safe to share across tasks.
#[derive(Clone)]
pub struct Broker {
    pool: Pool,
    group: String,
}

impl Broker {
    /// Connect to the broker and verify reachability before returning.
    ///
    /// This is the startup connectivity guard: a `PING` is attempted with
    /// bounded exponential backoff (2^n seconds before retry n, up to 5
    /// retries). Exhausting the retries is fatal; dependent components must
    /// not start with the broker in an unknown state.
    pub async fn connect(url: &str, group: impl Into<String>) -> Result<Self, BrokerError> {
        let broker = Self::unguarded(url, group)?;
        retry_with_backoff(MAX_CONNECT_RETRIES, || broker.ping()).await?;
        Ok(broker)
    }

    /// Create a handle without verifying reachability.
    ///
    /// Services should use [`Broker::connect`]; this path is for callers
    /// that own their failure handling.
    pub fn unguarded(url: &str, group: impl Into<String>) -> Result<Self, BrokerError> {
        let cfg = Config::from_url(url);
        let pool = cfg
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| BrokerError::Pool(e.to_string()))?;

        Ok(Self {
            pool,
            group: group.into(),
        })
    }

    /// The consumer group this handle declares and reads with.
    pub fn group(&self) -> &str {
        &self.group
    }

    /// Check broker reachability with a `PING`.
    pub async fn ping(&self) -> Result<(), BrokerError> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| BrokerError::Connection(e.to_string()))?;

        let _: String = cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    /// Declare a queue: create the stream and its consumer group if absent.
    ///
    /// Safe to repeat; a `BUSYGROUP` reply means the queue already exists.
    /// The group starts at id `0` so entries published before any consumer
    /// attaches are still delivered.
    pub async fn declare(&self, queue: &str) -> Result<(), BrokerError> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| BrokerError::Connection(e.to_string()))?;

        let result: Result<(), _> = cmd("XGROUP")
            .arg("CREATE")
            .arg(queue)
            .arg(&self.group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(()) => {
                debug!(queue = %queue, group = %self.group, "Declared queue");
                Ok(())
            }
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                debug!(queue = %queue, "Queue already declared");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Append a message to a queue. Returns the broker-assigned entry id.
    ///
    /// The entry is retained by the broker until consumed or trimmed; there
    /// is no per-message TTL and no headers beyond the single `body` field.
    pub async fn publish(&self, queue: &str, body: &str) -> Result<String, BrokerError> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| BrokerError::Connection(e.to_string()))?;

        let id: String = cmd("XADD")
            .arg(queue)
            .arg("*")
            .arg("body")
            .arg(body)
            .query_async(&mut conn)
            .await?;

        Ok(id)
    }

    /// Read the next batch of messages for `consumer`, blocking up to
    /// `block_ms` when the queue is empty.
    ///
    /// Reads with `NOACK`: delivered entries are never added to the pending
    /// list, so a consumer crash mid-processing loses them (at-most-once).
    pub async fn fetch(
        &self,
        queue: &str,
        consumer: &str,
        count: usize,
        block_ms: u64,
    ) -> Result<Vec<Delivery>, BrokerError> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| BrokerError::Connection(e.to_string()))?;

        let opts = StreamReadOptions::default()
            .group(&self.group, consumer)
            .noack()
            .block(block_ms as usize)
            .count(count);

        let reply: StreamReadReply = conn.xread_options(&[queue], &[">"], &opts).await?;

        let mut deliveries = Vec::new();
        for stream_key in reply.keys {
            for entry in stream_key.ids {
                match body_field(&entry.map) {
                    Some(body) => deliveries.push(Delivery { id: entry.id, body }),
                    None => {
                        warn!(id = %entry.id, queue = %queue, "Entry has no body field, skipping")
                    }
                }
            }
        }

        Ok(deliveries)
    }
}

/// Extract the `body` field from a stream entry.
fn body_field(map: &HashMap<String, RedisValue>) -> Option<String> {
    map.get("body").and_then(|val| match val {
        RedisValue::BulkString(bytes) => Some(String::from_utf8_lossy(bytes).to_string()),
        RedisValue::SimpleString(s) => Some(s.clone()),
        _ => None,
    })
}

/// Run `op` until it succeeds or `max_retries` retries are exhausted,
/// sleeping 2^n seconds before retry n.
async fn retry_with_backoff<T, F, Fut>(max_retries: u32, mut op: F) -> Result<T, BrokerError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, BrokerError>>,
{
    let mut attempt: u32 = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                attempt += 1;
                if attempt > max_retries {
                    return Err(BrokerError::Unreachable {
                        attempts: attempt,
                        last: e.to_string(),
                    });
                }

                let wait = Duration::from_secs(1u64 << attempt);
                warn!(
                    retry = attempt,
                    wait_secs = wait.as_secs(),
                    error = %e,
                    "Broker unreachable, waiting before retry"
                );
                tokio::time::sleep(wait).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tokio::time::Instant;

    fn refused() -> BrokerError {
        BrokerError::Connection("connection refused".to_string())
    }

    #[tokio::test(start_paused = true)]
    async fn test_guard_succeeds_on_third_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_in_op = calls.clone();
        let start = Instant::now();

        let result = retry_with_backoff(5, move || {
            let calls = calls_in_op.clone();
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(refused())
                } else {
                    Ok(())
                }
            }
        })
        .await;

        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // Waits of 2s then 4s before the successful third attempt
        assert_eq!(start.elapsed(), Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn test_guard_exhausts_after_five_retries() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_in_op = calls.clone();
        let start = Instant::now();

        let result: Result<(), _> = retry_with_backoff(5, move || {
            calls_in_op.fetch_add(1, Ordering::SeqCst);
            async { Err(refused()) }
        })
        .await;

        match result {
            Err(BrokerError::Unreachable { attempts, .. }) => assert_eq!(attempts, 6),
            other => panic!("expected Unreachable, got {:?}", other),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 6);
        // 2 + 4 + 8 + 16 + 32 seconds of backoff before giving up
        assert_eq!(start.elapsed(), Duration::from_secs(62));
    }

    #[tokio::test]
    async fn test_guard_first_attempt_success_sleeps_never() {
        let result = retry_with_backoff(5, || async { Ok(7u32) }).await;
        assert_eq!(result.unwrap(), 7);
    }

    #[test]
    fn test_body_field_extraction() {
        let mut map = HashMap::new();
        map.insert(
            "body".to_string(),
            RedisValue::BulkString(b"{\"questionId\":\"q-1\"}".to_vec()),
        );
        assert_eq!(
            body_field(&map).as_deref(),
            Some("{\"questionId\":\"q-1\"}")
        );

        let empty: HashMap<String, RedisValue> = HashMap::new();
        assert!(body_field(&empty).is_none());
    }
}
