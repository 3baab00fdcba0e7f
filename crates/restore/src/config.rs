use std::time::Duration;

/// Tunables for a single restore run. Built from CLI flags with
/// environment-variable fallbacks, the way the CLI resolves
/// `COLDVAULT_LOG_FORMAT`/`COLDVAULT_MASTER_KEY` from the environment.
#[derive(Debug, Clone)]
pub struct RestoreConfig {
    pub max_concurrent_files: usize,
    pub max_concurrent_downloads: usize,
    pub max_decompress_workers: usize,
    pub cache_capacity_entries: usize,
    pub cache_capacity_bytes: u64,
    /// Blocksize every opened volume's manifest is checked against before
    /// any of its blocks are read (spec §6 manifest compatibility check).
    pub expected_blocksize: u32,
    pub download_timeout: Duration,
    pub decrypt_timeout: Duration,
    pub decompress_timeout: Duration,
    pub write_timeout: Duration,
    pub retry_base: Duration,
    pub retry_cap: Duration,
    pub retry_max_attempts: u32,
    /// When set, any per-file-fatal error aborts the whole restore.
    pub strict: bool,
}

impl Default for RestoreConfig {
    fn default() -> Self {
        Self {
            max_concurrent_files: common::DEFAULT_MAX_CONCURRENT_FILES,
            max_concurrent_downloads: common::DEFAULT_MAX_CONCURRENT_DOWNLOADS,
            max_decompress_workers: num_cpus::get(),
            cache_capacity_entries: common::DEFAULT_CACHE_CAPACITY_ENTRIES,
            cache_capacity_bytes: common::DEFAULT_CACHE_CAPACITY_BYTES,
            expected_blocksize: common::DEFAULT_VOLUME_BLOCK_SIZE,
            download_timeout: Duration::from_secs(10 * 60),
            decrypt_timeout: Duration::from_secs(5 * 60),
            decompress_timeout: Duration::from_secs(60),
            write_timeout: Duration::from_secs(30),
            retry_base: Duration::from_secs(1),
            retry_cap: Duration::from_secs(60),
            retry_max_attempts: 5,
            strict: false,
        }
    }
}

impl RestoreConfig {
    /// Overlay environment-variable overrides onto the defaults, mirroring
    /// this codebase's `COLDVAULT_*`-prefixed env var resolution.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(v) = env_usize("COLDVAULT_MAX_CONCURRENT_FILES") {
            config.max_concurrent_files = v;
        }
        if let Some(v) = env_usize("COLDVAULT_MAX_CONCURRENT_DOWNLOADS") {
            config.max_concurrent_downloads = v;
        }
        if let Some(v) = env_usize("COLDVAULT_MAX_DECOMPRESS_WORKERS") {
            config.max_decompress_workers = v;
        }
        if let Some(v) = env_usize("COLDVAULT_CACHE_CAPACITY_ENTRIES") {
            config.cache_capacity_entries = v;
        }
        if let Ok(v) = std::env::var("COLDVAULT_CACHE_CAPACITY_BYTES") {
            if let Ok(parsed) = v.parse() {
                config.cache_capacity_bytes = parsed;
            }
        }
        if let Ok(v) = std::env::var("COLDVAULT_EXPECTED_BLOCKSIZE") {
            if let Ok(parsed) = v.parse() {
                config.expected_blocksize = parsed;
            }
        }
        if std::env::var("COLDVAULT_STRICT").is_ok_and(|v| v == "1" || v.eq_ignore_ascii_case("true")) {
            config.strict = true;
        }

        config
    }
}

fn env_usize(key: &str) -> Option<usize> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}
