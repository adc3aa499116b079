use serde::Deserialize;
use std::time::Duration;

/// Main configuration structure for the hashtag crawler
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub crawler: CrawlerConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default)]
    pub input: InputConfig,
    pub output: OutputConfig,
    #[serde(default)]
    pub spam: SpamConfig,
}

/// Tick timing of the rate-limited scheduler
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SchedulerConfig {
    /// Remote API requests allowed per hour
    #[serde(default = "default_hourly_quota")]
    pub hourly_quota: u32,

    /// Buffer added on top of the quota-derived period (milliseconds)
    #[serde(default = "default_safety_margin_ms")]
    pub safety_margin_ms: u64,

    /// Delay before the first tick (milliseconds)
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    /// Explicit tick period, overrides the quota-derived one (milliseconds)
    #[serde(default)]
    pub tick_period_ms: Option<u64>,
}

impl SchedulerConfig {
    /// Returns the tick period
    ///
    /// Derived as `ceil(1h / hourly_quota) + safety_margin` unless an
    /// explicit `tick-period-ms` is configured. With the default quota of
    /// 2000 requests/hour this is 1800ms + 46ms.
    pub fn tick_period(&self) -> Duration {
        if let Some(ms) = self.tick_period_ms {
            return Duration::from_millis(ms);
        }
        let quota = u64::from(self.hourly_quota.max(1));
        let base = 3_600_000u64.div_ceil(quota);
        Duration::from_millis(base + self.safety_margin_ms)
    }

    /// Returns the delay before the first tick
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            hourly_quota: default_hourly_quota(),
            safety_margin_ms: default_safety_margin_ms(),
            initial_delay_ms: default_initial_delay_ms(),
            tick_period_ms: None,
        }
    }
}

/// Batch forming, backpressure and shutdown behavior
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CrawlerConfig {
    /// Maximum number of distinct URLs resolved per batch
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Queue size at which the producer blocks, as a multiple of the chunk size
    #[serde(default = "default_backpressure_multiple")]
    pub backpressure_multiple: usize,

    /// Timeout of a single batch request (milliseconds)
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Maximum time to wait for pending work on shutdown (seconds)
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,

    /// Number of posts buffered before they are stored in bulk
    #[serde(default = "default_post_flush_size")]
    pub post_flush_size: usize,
}

impl CrawlerConfig {
    /// Combined primary + retry queue size at which ingestion blocks
    pub fn backpressure_threshold(&self) -> usize {
        self.chunk_size.saturating_mul(self.backpressure_multiple)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            backpressure_multiple: default_backpressure_multiple(),
            request_timeout_ms: default_request_timeout_ms(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
            post_flush_size: default_post_flush_size(),
        }
    }
}

/// Redirect cache sizing and miss policy
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CacheConfig {
    /// Number of redirects kept in memory
    #[serde(default = "default_cache_capacity")]
    pub capacity: usize,

    /// Consult the database on a cache miss before declaring the URL unknown
    #[serde(default)]
    pub check_persisted: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: default_cache_capacity(),
            check_persisted: false,
        }
    }
}

/// Remote batch query endpoint
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RemoteConfig {
    /// Query endpoint URL
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Alias under which the data table is used in queries
    #[serde(default = "default_table_name")]
    pub table_name: String,

    /// Location of the data table definition
    #[serde(default = "default_table_definition")]
    pub table_definition: String,

    /// User agent the remote service presents to crawled sites
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            table_name: default_table_name(),
            table_definition: default_table_definition(),
            user_agent: default_user_agent(),
        }
    }
}

/// Post dump input location
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct InputConfig {
    /// Directory scanned for dump files
    #[serde(default = "default_input_directory")]
    pub directory: String,

    /// Regular expression dump file names must match
    #[serde(default = "default_file_pattern")]
    pub file_pattern: String,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            directory: default_input_directory(),
            file_pattern: default_file_pattern(),
        }
    }
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct OutputConfig {
    /// Path to the SQLite database file
    pub database_path: String,
}

/// Spam detection
#[derive(Debug, Clone, Deserialize)]
pub struct SpamConfig {
    /// Hashtags marking a post as spam (matched case-insensitively)
    #[serde(default = "default_spam_hashtags")]
    pub hashtags: Vec<String>,
}

impl Default for SpamConfig {
    fn default() -> Self {
        Self {
            hashtags: default_spam_hashtags(),
        }
    }
}

fn default_hourly_quota() -> u32 {
    2000
}

fn default_safety_margin_ms() -> u64 {
    46
}

fn default_initial_delay_ms() -> u64 {
    10
}

fn default_chunk_size() -> usize {
    100
}

fn default_backpressure_multiple() -> usize {
    10
}

fn default_request_timeout_ms() -> u64 {
    7500
}

fn default_shutdown_grace_secs() -> u64 {
    600
}

fn default_post_flush_size() -> usize {
    2500
}

fn default_cache_capacity() -> usize {
    1_000_000
}

fn default_endpoint() -> String {
    "http://query.yahooapis.com/v1/public/yql".to_string()
}

fn default_table_name() -> String {
    "DATA".to_string()
}

fn default_table_definition() -> String {
    "store://wPdxHE6ILC1Ti4oCGOIs0v".to_string()
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (compatible; MSIE 6.0; Windows NT 5.1)".to_string()
}

fn default_input_directory() -> String {
    "./".to_string()
}

fn default_file_pattern() -> String {
    r"tweets_w_links_n_htags_.*\.stream".to_string()
}

fn default_spam_hashtags() -> Vec<String> {
    vec![
        "gameinsight".to_string(),
        "nowplaying".to_string(),
        "listenlive".to_string(),
    ]
}
