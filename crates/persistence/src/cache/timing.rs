//! Rolling enroll-duration statistics behind the Retry-After hint.
//!
//! Each completed enroll/unenroll contributes its end-to-end elapsed time.
//! Two strategies are supported; both update the running average atomically
//! with a Lua script so concurrent subscribers cannot tear the sum/count
//! pair.

use tracing::{error, info};

use super::{CacheClient, CacheError, CACHE_TIMEOUT};

const KEY_ENROLL_ELAPSED: &str = "enroll_elapsed";
const KEY_ENROLL_ELAPSED_AVERAGE: &str = "enroll_elapsed_average";
const KEY_UNENROLL_ELAPSED: &str = "unenroll_elapsed";
const KEY_ENROLL_LAST_N: &str = "enroll_last_n";
const KEY_ENROLL_LAST_N_AVERAGE: &str = "enroll_last_n:average";

/// Cumulative mean: sum and count grow forever, average = ceil(sum/count).
const CUMULATIVE_AVERAGE_SCRIPT: &str = r#"
local key = KEYS[1]
local value = redis.call("GET", key)
if not value then
    value = 0
end
value = value + ARGV[1]
redis.call("SET", key, value)

local countkey = string.format("%s_%s", key, "count")
local count = redis.call("INCR", countkey)

local avgkey = string.format("%s_%s", key, "average")
local avg = math.ceil(value / count)
redis.call("SET", avgkey, avg)
return avg
"#;

/// Sliding window: a fifo of the last N elapsed values and the average of
/// whatever the window currently holds. There is no time based purge.
const SLIDING_WINDOW_SCRIPT: &str = r#"
local key = KEYS[1]
local value = ARGV[1]
local max_count = ARGV[2]
local popped = 0.0

redis.call("RPUSH", key, value)
local count = redis.call("LLEN", key)
if count >= tonumber(max_count) then
    popped = redis.call("LPOP", key)
end

local sumkey = string.format("%s:%s", key, "sum")
value = value - popped
local sum = redis.call("INCRBYFLOAT", sumkey, value)

local avg = math.ceil(sum / count)
local avgkey = string.format("%s:%s", key, "average")
redis.call("SET", avgkey, avg)
return avg
"#;

/// Strategy used to answer "how long should the device wait before polling
/// again".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryHintStrategy {
    /// Cumulative mean over all observed enrolls.
    AverageEnrollTime,
    /// Mean over the last N enrolls.
    SlidingWindow,
}

impl RetryHintStrategy {
    pub fn parse(value: &str) -> Self {
        match value {
            "sliding_window" => RetryHintStrategy::SlidingWindow,
            _ => RetryHintStrategy::AverageEnrollTime,
        }
    }
}

impl CacheClient {
    /// Records an enroll elapsed time (seconds) under the configured
    /// strategy. Best effort.
    pub async fn add_enroll_elapsed(&self, elapsed: f64) {
        if !self.is_enabled() {
            return;
        }
        let result = match self.strategy {
            RetryHintStrategy::AverageEnrollTime => {
                self.run_average_script(CUMULATIVE_AVERAGE_SCRIPT, KEY_ENROLL_ELAPSED, elapsed, None)
                    .await
            }
            RetryHintStrategy::SlidingWindow => {
                self.run_average_script(
                    SLIDING_WINDOW_SCRIPT,
                    KEY_ENROLL_LAST_N,
                    elapsed,
                    Some(self.window_size),
                )
                .await
            }
        };
        match result {
            Ok(avg) => info!(average = avg, "Average elapsed time for enroll"),
            Err(e) => error!(error = %e, "Could not update average enroll time"),
        }
    }

    /// Records an unenroll elapsed time. Unenroll always uses the cumulative
    /// mean; it does not feed the Retry-After hint strategy.
    pub async fn add_unenroll_elapsed(&self, elapsed: f64) {
        if !self.is_enabled() {
            return;
        }
        match self
            .run_average_script(CUMULATIVE_AVERAGE_SCRIPT, KEY_UNENROLL_ELAPSED, elapsed, None)
            .await
        {
            Ok(avg) => info!(average = avg, "Average elapsed time for unenroll"),
            Err(e) => error!(error = %e, "Could not update average unenroll time"),
        }
    }

    /// Current rolling average enroll time in seconds, under the configured
    /// strategy.
    pub async fn average_enroll_seconds(&self) -> Result<i64, CacheError> {
        let key = match self.strategy {
            RetryHintStrategy::AverageEnrollTime => KEY_ENROLL_ELAPSED_AVERAGE,
            RetryHintStrategy::SlidingWindow => KEY_ENROLL_LAST_N_AVERAGE,
        };
        let raw = self.get_string(key).await?;
        raw.parse::<i64>().map_err(|_| CacheError::Miss)
    }

    async fn run_average_script(
        &self,
        script: &str,
        key: &str,
        elapsed: f64,
        window_size: Option<i64>,
    ) -> Result<i64, CacheError> {
        let mut connection = self.connection()?;
        let script = redis::Script::new(script);
        let mut invocation = script.key(key);
        invocation.arg(elapsed);
        if let Some(window_size) = window_size {
            invocation.arg(window_size);
        }
        let avg: i64 = tokio::time::timeout(
            CACHE_TIMEOUT,
            invocation.invoke_async(&mut connection),
        )
        .await
        .map_err(|_| CacheError::Deadline)??;
        Ok(avg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_parse() {
        assert_eq!(
            RetryHintStrategy::parse("sliding_window"),
            RetryHintStrategy::SlidingWindow
        );
        assert_eq!(
            RetryHintStrategy::parse("average_enroll_time"),
            RetryHintStrategy::AverageEnrollTime
        );
        // Unknown strategies fall back to the cumulative mean.
        assert_eq!(
            RetryHintStrategy::parse("queue_backlog"),
            RetryHintStrategy::AverageEnrollTime
        );
    }
}
