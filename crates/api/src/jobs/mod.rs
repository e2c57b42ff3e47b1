//! Background job scheduling for the front service.

mod pending_gauge;
mod reap_expired;
mod scheduler;

pub use pending_gauge::PendingEnrollGaugeJob;
pub use reap_expired::ReapExpiredEnrollsJob;
pub use scheduler::{Job, JobScheduler};

use std::time::Duration;

/// Parses a repeat interval like "45s", "30m", "24h".
pub fn parse_every(value: &str) -> Result<Duration, String> {
    let value = value.trim();
    let (number, unit) = value.split_at(value.len().saturating_sub(1));
    let amount: u64 = number
        .parse()
        .map_err(|_| format!("invalid interval: {value}"))?;
    let seconds = match unit {
        "s" => amount,
        "m" => amount * 60,
        "h" => amount * 3600,
        _ => return Err(format!("invalid interval unit: {value}")),
    };
    if seconds == 0 {
        return Err(format!("interval must be positive: {value}"));
    }
    Ok(Duration::from_secs(seconds))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_every() {
        assert_eq!(parse_every("45s").unwrap(), Duration::from_secs(45));
        assert_eq!(parse_every("30m").unwrap(), Duration::from_secs(1800));
        assert_eq!(parse_every("24h").unwrap(), Duration::from_secs(86400));
    }

    #[test]
    fn test_parse_every_rejects_garbage() {
        assert!(parse_every("").is_err());
        assert!(parse_every("10x").is_err());
        assert!(parse_every("h").is_err());
        assert!(parse_every("0m").is_err());
    }
}
