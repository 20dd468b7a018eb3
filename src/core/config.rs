use std::path::PathBuf;
use std::time::Duration;

use crate::core::error::{Error, ErrorKind, Result};

#[derive(Debug, Clone)]
pub struct Config {
    pub db_directory: PathBuf,

    pub max_partition_size: u64,        // target events per shard, power of two
    pub max_resident_partitions: usize, // cap on concurrently in-memory shards
    pub max_taste_partitions: usize,    // size of the first evaluation wave
    pub max_queries: usize,             // concurrency cap on active queries

    pub meta_index_fp_rate: f64, // bloom synopsis false-positive rate

    pub max_segment_size: u64,  // bytes before the active builder is sealed
    pub segments_cached: usize, // decoded segments kept in memory

    pub shutdown_grace_period: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            db_directory: PathBuf::from("spyglass.db"),
            max_partition_size: 1 << 20,
            max_resident_partitions: 10,
            max_taste_partitions: 5,
            max_queries: 10,
            meta_index_fp_rate: 0.01,
            max_segment_size: 128 * 1024 * 1024,
            segments_cached: 10,
            shutdown_grace_period: Duration::from_secs(180),
        }
    }
}

impl Config {
    /// Rejects option combinations the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if !self.max_partition_size.is_power_of_two() {
            return Err(Error::new(
                ErrorKind::InvalidConfiguration,
                format!(
                    "max-partition-size must be a positive power of two, got {}",
                    self.max_partition_size
                ),
            ));
        }
        if self.max_resident_partitions == 0 {
            return Err(Error::new(
                ErrorKind::InvalidConfiguration,
                "max-resident-partitions must be positive",
            ));
        }
        if self.max_taste_partitions == 0
            || self.max_taste_partitions > self.max_resident_partitions
        {
            return Err(Error::new(
                ErrorKind::InvalidConfiguration,
                format!(
                    "max-taste-partitions must be in 1..={}, got {}",
                    self.max_resident_partitions, self.max_taste_partitions
                ),
            ));
        }
        if self.max_queries == 0 {
            return Err(Error::new(
                ErrorKind::InvalidConfiguration,
                "max-queries must be positive",
            ));
        }
        if !(self.meta_index_fp_rate > 0.0 && self.meta_index_fp_rate < 1.0) {
            return Err(Error::new(
                ErrorKind::InvalidConfiguration,
                format!(
                    "meta-index-fp-rate must be in (0, 1), got {}",
                    self.meta_index_fp_rate
                ),
            ));
        }
        if self.max_segment_size == 0 {
            return Err(Error::new(
                ErrorKind::InvalidConfiguration,
                "max-segment-size must be positive",
            ));
        }
        if self.segments_cached == 0 {
            return Err(Error::new(
                ErrorKind::InvalidConfiguration,
                "segments-cached must be positive",
            ));
        }
        Ok(())
    }
}

/// Parses a human-readable duration such as `90s`, `3min`, `500ms`, or `2h`.
/// A bare number is taken as seconds.
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    let split = s
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .unwrap_or(s.len());
    let (num, unit) = s.split_at(split);
    let value: f64 = num
        .parse()
        .map_err(|_| Error::new(ErrorKind::Convert, format!("invalid duration: {:?}", s)))?;
    let secs = match unit.trim() {
        "" | "s" | "sec" | "secs" => value,
        "ms" => value / 1_000.0,
        "us" => value / 1_000_000.0,
        "ns" => value / 1_000_000_000.0,
        "m" | "min" | "mins" => value * 60.0,
        "h" | "hour" | "hours" => value * 3_600.0,
        "d" | "day" | "days" => value * 86_400.0,
        other => {
            return Err(Error::new(
                ErrorKind::Convert,
                format!("unknown duration unit: {:?}", other),
            ))
        }
    };
    if secs < 0.0 || !secs.is_finite() {
        return Err(Error::new(
            ErrorKind::Convert,
            format!("invalid duration: {:?}", s),
        ));
    }
    Ok(Duration::from_secs_f64(secs))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn rejects_non_power_of_two_partition_size() {
        let mut config = Config::default();
        config.max_partition_size = 1000;
        let err = config.validate().unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidConfiguration);
    }

    #[test]
    fn rejects_taste_above_resident() {
        let mut config = Config::default();
        config.max_taste_partitions = config.max_resident_partitions + 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_fp_rate_out_of_range() {
        let mut config = Config::default();
        config.meta_index_fp_rate = 1.0;
        assert!(config.validate().is_err());
        config.meta_index_fp_rate = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn parses_durations() {
        assert_eq!(parse_duration("90s").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_duration("3min").unwrap(), Duration::from_secs(180));
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("2h").unwrap(), Duration::from_secs(7200));
        assert_eq!(parse_duration("42").unwrap(), Duration::from_secs(42));
        assert!(parse_duration("fast").is_err());
    }
}
