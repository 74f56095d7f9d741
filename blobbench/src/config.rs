use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use crate::Error;

pub const DEFAULT_TOTAL_RECORDS: u64 = 1000;
pub const DEFAULT_RECORD_SIZE: usize = 1024;
pub const DEFAULT_WORKER_COUNT: u64 = 4;
pub const DEFAULT_BATCH_SIZE: u64 = 20;
pub const DEFAULT_BASE_PATH: &str = "/tmp/benchmark";

/// Parameters of one benchmark run.
///
/// Construct through [`BenchmarkConfig::builder`]; the builder validates once
/// and the resulting value cannot be changed.
#[derive(Debug, Clone)]
pub struct BenchmarkConfig {
    total_records: u64,
    min_record_size: usize,
    max_record_size: usize,
    worker_count: u64,
    batch_size: u64,
    base_path: PathBuf,
    verify_reads: bool,
    seed: u64,
    phase_timeout: Option<Duration>,
}

impl Default for BenchmarkConfig {
    fn default() -> Self {
        BenchmarkConfig {
            total_records: DEFAULT_TOTAL_RECORDS,
            min_record_size: DEFAULT_RECORD_SIZE,
            max_record_size: DEFAULT_RECORD_SIZE,
            worker_count: DEFAULT_WORKER_COUNT,
            batch_size: DEFAULT_BATCH_SIZE,
            base_path: PathBuf::from(DEFAULT_BASE_PATH),
            verify_reads: false,
            seed: 0,
            phase_timeout: None,
        }
    }
}

impl BenchmarkConfig {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder {
            config: BenchmarkConfig::default(),
        }
    }

    /// Number of logical records written and read per backend.
    pub fn total_records(&self) -> u64 {
        self.total_records
    }
    pub fn min_record_size(&self) -> usize {
        self.min_record_size
    }
    pub fn max_record_size(&self) -> usize {
        self.max_record_size
    }
    pub fn worker_count(&self) -> u64 {
        self.worker_count
    }
    /// Operations dispatched concurrently by one worker.
    pub fn batch_size(&self) -> u64 {
        self.batch_size
    }
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }
    /// Compare every read value against the value the write phase produced.
    pub fn verify_reads(&self) -> bool {
        self.verify_reads
    }
    /// Seed for record content and length generation.
    pub fn seed(&self) -> u64 {
        self.seed
    }
    pub fn phase_timeout(&self) -> Option<Duration> {
        self.phase_timeout
    }

    fn validate(&self) -> Result<(), Error> {
        if self.total_records == 0 {
            return Err(Error::InvalidConfig(
                "total_records must be at least 1".to_owned(),
            ));
        }
        if self.min_record_size > self.max_record_size {
            return Err(Error::InvalidConfig(format!(
                "min_record_size ({}) exceeds max_record_size ({})",
                self.min_record_size, self.max_record_size
            )));
        }
        if self.worker_count == 0 {
            return Err(Error::InvalidConfig(
                "worker_count must be at least 1".to_owned(),
            ));
        }
        if self.batch_size == 0 {
            return Err(Error::InvalidConfig(
                "batch_size must be at least 1".to_owned(),
            ));
        }
        if self.phase_timeout == Some(Duration::ZERO) {
            return Err(Error::InvalidConfig(
                "phase_timeout must be non-zero".to_owned(),
            ));
        }
        Ok(())
    }
}

pub struct ConfigBuilder {
    config: BenchmarkConfig,
}

impl ConfigBuilder {
    pub fn total_records(mut self, total_records: u64) -> Self {
        self.config.total_records = total_records;
        self
    }

    /// Every record gets exactly `size` bytes.
    pub fn record_size(self, size: usize) -> Self {
        self.record_size_range(size, size)
    }

    /// Record lengths are sampled uniformly from `min..=max`.
    pub fn record_size_range(mut self, min: usize, max: usize) -> Self {
        self.config.min_record_size = min;
        self.config.max_record_size = max;
        self
    }

    pub fn worker_count(mut self, worker_count: u64) -> Self {
        self.config.worker_count = worker_count;
        self
    }

    pub fn batch_size(mut self, batch_size: u64) -> Self {
        self.config.batch_size = batch_size;
        self
    }

    pub fn base_path(mut self, base_path: impl Into<PathBuf>) -> Self {
        self.config.base_path = base_path.into();
        self
    }

    pub fn verify_reads(mut self, verify_reads: bool) -> Self {
        self.config.verify_reads = verify_reads;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.config.seed = seed;
        self
    }

    pub fn phase_timeout(mut self, phase_timeout: Option<Duration>) -> Self {
        self.config.phase_timeout = phase_timeout;
        self
    }

    pub fn build(self) -> Result<BenchmarkConfig, Error> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = BenchmarkConfig::builder().build().unwrap();
        assert_eq!(config.total_records(), 1000);
        assert_eq!(config.min_record_size(), 1024);
        assert_eq!(config.max_record_size(), 1024);
        assert_eq!(config.worker_count(), 4);
        assert_eq!(config.batch_size(), 20);
        assert_eq!(config.base_path(), Path::new("/tmp/benchmark"));
        assert!(!config.verify_reads());
        assert_eq!(config.phase_timeout(), None);
    }

    #[test]
    fn rejects_zero_workers() {
        let err = BenchmarkConfig::builder().worker_count(0).build().unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)), "{err}");
    }

    #[test]
    fn rejects_zero_batch_size_and_records() {
        assert!(matches!(
            BenchmarkConfig::builder().batch_size(0).build(),
            Err(Error::InvalidConfig(_))
        ));
        assert!(matches!(
            BenchmarkConfig::builder().total_records(0).build(),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn rejects_inverted_size_range() {
        let err = BenchmarkConfig::builder()
            .record_size_range(2048, 1024)
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)), "{err}");
    }

    #[test]
    fn zero_sized_records_are_allowed() {
        let config = BenchmarkConfig::builder().record_size(0).build().unwrap();
        assert_eq!(config.max_record_size(), 0);
    }
}
