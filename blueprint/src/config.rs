//! Configuration management using Figment
//!
//! Configuration is loaded from multiple sources with the following precedence (highest to lowest):
//! 1. Environment variables (prefix: BLUEPRINT_)
//! 2. Current working directory: ./config.toml
//! 3. XDG config directory: ~/.config/blueprint/{service_name}/config.toml
//! 4. System directory: /etc/blueprint/{service_name}/config.toml
//! 5. Default values

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Service configuration
    pub service: ServiceConfig,

    /// HTTP server configuration
    pub server: ServerConfig,

    /// Session configuration
    #[serde(default)]
    pub session: SessionConfig,

    /// JWT configuration
    #[serde(default)]
    pub jwt: JwtConfig,

    /// HMAC request authentication configuration
    #[serde(default)]
    pub hmac: HmacConfig,

    /// Per-IP rate limiting configuration
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Security response headers configuration
    #[serde(default)]
    pub security_headers: SecurityHeadersConfig,

    /// Ambient middleware configuration
    #[serde(default)]
    pub middleware: MiddlewareConfig,

    /// Redis configuration (optional)
    #[serde(default)]
    pub redis: Option<RedisConfig>,

    /// Kafka consumer configuration (optional)
    #[serde(default)]
    pub kafka_consumer: Option<KafkaConsumerConfig>,

    /// Kafka producer configuration (optional)
    #[serde(default)]
    pub kafka_producer: Option<KafkaProducerConfig>,
}

/// Service-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Service name
    pub name: String,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Environment (dev, staging, production)
    #[serde(default = "default_environment")]
    pub environment: String,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind host
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Debug mode (verbose errors, permissive CORS)
    #[serde(default = "default_false")]
    pub debug: bool,

    /// Read/request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub read_timeout_secs: u64,

    /// Write/response timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub write_timeout_secs: u64,

    /// Proxies whose forwarding headers are trusted for client IP extraction
    #[serde(default)]
    pub trusted_proxies: Vec<String>,

    /// Free-form options (authTokenHeader, authTokenSecret, serverName, ...)
    #[serde(default)]
    pub options: HashMap<String, serde_json::Value>,

    /// TLS configuration (optional)
    #[serde(default)]
    pub tls: Option<TlsConfig>,
}

impl ServerConfig {
    /// Socket address string for binding
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Request timeout as a Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    fn option_str(&self, key: &str) -> Option<&str> {
        self.options.get(key).and_then(|v| v.as_str())
    }

    /// Header name used by the static-token auth provider
    pub fn auth_token_header(&self) -> &str {
        self.option_str("authTokenHeader").unwrap_or("X-API-Key")
    }

    /// Secret expected by the static-token auth provider (empty disables auth)
    pub fn auth_token_secret(&self) -> &str {
        self.option_str("authTokenSecret").unwrap_or("")
    }

    /// Server name advertised in responses and basic-auth realms
    pub fn server_name(&self) -> &str {
        self.option_str("serverName").unwrap_or("blueprint")
    }
}

/// TLS configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsConfig {
    /// Path to the PEM certificate chain
    pub cert_path: PathBuf,

    /// Path to the PEM private key
    pub key_path: PathBuf,
}

/// Session configuration
///
/// # Example
///
/// ```toml
/// [session]
/// cookie_name = "session_id"
/// expiration_secs = 86400
/// idle_timeout_secs = 3600
/// secure = true
/// same_site = "lax"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Session cookie name.
    ///
    /// Default: `"session_id"`
    #[serde(default = "default_cookie_name")]
    pub cookie_name: String,

    /// Absolute session lifetime in seconds.
    ///
    /// Default: `86400` (24 hours)
    #[serde(default = "default_expiration_secs")]
    pub expiration_secs: u64,

    /// Idle timeout in seconds; a session untouched for longer is expired.
    ///
    /// Default: `3600` (1 hour)
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,

    /// Secure cookie flag (HTTPS only).
    ///
    /// Default: `true`
    #[serde(default = "default_true")]
    pub secure: bool,

    /// HttpOnly cookie flag.
    ///
    /// Default: `true`
    #[serde(default = "default_true")]
    pub http_only: bool,

    /// SameSite cookie policy: `"strict"`, `"lax"`, or `"none"`.
    ///
    /// Default: `"lax"`
    #[serde(default = "default_same_site")]
    pub same_site: String,

    /// Cookie path.
    ///
    /// Default: `"/"`
    #[serde(default = "default_cookie_path")]
    pub path: String,
}

impl SessionConfig {
    pub fn max_lifetime(&self) -> Duration {
        Duration::from_secs(self.expiration_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_name: default_cookie_name(),
            expiration_secs: default_expiration_secs(),
            idle_timeout_secs: default_idle_timeout_secs(),
            secure: true,
            http_only: true,
            same_site: default_same_site(),
            path: default_cookie_path(),
        }
    }
}

/// JWT configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtConfig {
    /// JWT algorithm (HS256/384/512, RS256/384/512, ES256/384, EdDSA)
    #[serde(default = "default_jwt_algorithm")]
    pub algorithm: String,

    /// Symmetric signing secret (HS* algorithms)
    #[serde(default)]
    pub signing_key: Option<String>,

    /// Path to the PEM private key (RS*/ES*/EdDSA signing)
    #[serde(default)]
    pub private_key_path: Option<PathBuf>,

    /// Path to the PEM public key (RS*/ES*/EdDSA verification)
    #[serde(default)]
    pub public_key_path: Option<PathBuf>,

    /// Token lifetime in seconds
    #[serde(default = "default_jwt_expiration_secs")]
    pub expiration_secs: u64,

    /// Issuer claim, validated exactly on parse
    #[serde(default)]
    pub issuer: Option<String>,

    /// Audience claim, validated exactly on parse
    #[serde(default)]
    pub audience: Option<String>,
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            algorithm: default_jwt_algorithm(),
            signing_key: None,
            private_key_path: None,
            public_key_path: None,
            expiration_secs: default_jwt_expiration_secs(),
            issuer: None,
            audience: None,
        }
    }
}

/// HMAC request authentication configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HmacConfig {
    /// Acceptable clock skew around `now` for signed timestamps, in seconds.
    ///
    /// Default: `300` (5 minutes)
    #[serde(default = "default_key_interval_secs")]
    pub key_interval_secs: u64,

    /// Maximum signed body size in bytes.
    ///
    /// Default: `10485760` (10 MiB)
    #[serde(default = "default_max_input_bytes")]
    pub max_input_bytes: usize,

    /// Nonce retention in seconds; clamped to at least twice the key interval.
    #[serde(default = "default_nonce_ttl_secs")]
    pub nonce_ttl_secs: u64,

    /// Maximum entries held by the in-memory nonce store.
    #[serde(default = "default_nonce_capacity")]
    pub nonce_capacity: usize,

    /// Signature header name
    #[serde(default = "default_hash_header")]
    pub hash_header: String,

    /// Timestamp header name
    #[serde(default = "default_timestamp_header")]
    pub timestamp_header: String,

    /// Nonce header name
    #[serde(default = "default_nonce_header")]
    pub nonce_header: String,
}

impl HmacConfig {
    pub fn key_interval(&self) -> Duration {
        Duration::from_secs(self.key_interval_secs)
    }

    /// Nonce TTL, never below `2 * key_interval` so replays cannot outlive
    /// the acceptance window
    pub fn nonce_ttl(&self) -> Duration {
        Duration::from_secs(self.nonce_ttl_secs.max(2 * self.key_interval_secs))
    }
}

impl Default for HmacConfig {
    fn default() -> Self {
        Self {
            key_interval_secs: default_key_interval_secs(),
            max_input_bytes: default_max_input_bytes(),
            nonce_ttl_secs: default_nonce_ttl_secs(),
            nonce_capacity: default_nonce_capacity(),
            hash_header: default_hash_header(),
            timestamp_header: default_timestamp_header(),
            nonce_header: default_nonce_header(),
        }
    }
}

/// Per-IP rate limiting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Enable rate limiting
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Sustained refill rate, requests per minute per client IP
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u32,

    /// Burst size (bucket capacity)
    #[serde(default = "default_burst")]
    pub burst: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            requests_per_minute: default_requests_per_minute(),
            burst: default_burst(),
        }
    }
}

/// Security response headers configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityHeadersConfig {
    /// Enable security headers
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// X-Content-Type-Options: nosniff
    #[serde(default = "default_true")]
    pub x_content_type_options: bool,

    /// X-XSS-Protection value (empty disables the header)
    #[serde(default = "default_xss_protection")]
    pub x_xss_protection: String,

    /// X-Frame-Options value (empty disables the header)
    #[serde(default = "default_frame_options")]
    pub x_frame_options: String,

    /// Referrer-Policy value (empty disables the header)
    #[serde(default = "default_referrer_policy")]
    pub referrer_policy: String,

    /// Feature-Policy value (optional, legacy header)
    #[serde(default)]
    pub feature_policy: Option<String>,

    /// Permissions-Policy value (optional)
    #[serde(default)]
    pub permissions_policy: Option<String>,

    /// Send Strict-Transport-Security (only when serving TLS)
    #[serde(default = "default_true")]
    pub hsts: bool,

    /// HSTS max-age in seconds
    #[serde(default = "default_hsts_max_age")]
    pub hsts_max_age_secs: u64,

    /// HSTS includeSubDomains directive
    #[serde(default = "default_true")]
    pub hsts_include_subdomains: bool,

    /// HSTS preload directive
    #[serde(default = "default_false")]
    pub hsts_preload: bool,

    /// Content-Security-Policy template; `{nonce}` is replaced with a fresh
    /// per-request CSPRNG nonce
    #[serde(default)]
    pub content_security_policy: Option<String>,

    /// Emit Cache-Control: no-store / Pragma: no-cache / Expires: 0
    #[serde(default = "default_false")]
    pub no_store: bool,
}

impl Default for SecurityHeadersConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            x_content_type_options: true,
            x_xss_protection: default_xss_protection(),
            x_frame_options: default_frame_options(),
            referrer_policy: default_referrer_policy(),
            feature_policy: None,
            permissions_policy: None,
            hsts: true,
            hsts_max_age_secs: default_hsts_max_age(),
            hsts_include_subdomains: true,
            hsts_preload: false,
            content_security_policy: None,
            no_store: false,
        }
    }
}

/// Ambient middleware configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MiddlewareConfig {
    /// Request body size limit in MB
    #[serde(default = "default_body_limit_mb")]
    pub body_limit_mb: usize,

    /// Enable panic recovery middleware
    #[serde(default = "default_true")]
    pub catch_panic: bool,

    /// Enable compression
    #[serde(default = "default_true")]
    pub compression: bool,

    /// CORS mode: permissive, restrictive, disabled
    #[serde(default = "default_cors_mode")]
    pub cors_mode: String,
}

impl Default for MiddlewareConfig {
    fn default() -> Self {
        Self {
            body_limit_mb: default_body_limit_mb(),
            catch_panic: true,
            compression: true,
            cors_mode: default_cors_mode(),
        }
    }
}

/// Redis configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Redis connection URL (redis://host:port)
    pub url: String,

    /// Maximum number of connections in the pool
    #[serde(default = "default_redis_max_connections")]
    pub max_connections: usize,

    /// Connection timeout in seconds
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout_secs: u64,

    /// Maximum retry attempts for establishing Redis connection
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay between retry attempts in seconds
    #[serde(default = "default_retry_delay")]
    pub retry_delay_secs: u64,
}

/// Kafka SASL mechanism
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum KafkaAuthType {
    /// No authentication
    #[default]
    None,
    /// SASL PLAIN
    Plain,
    /// SASL SCRAM-SHA-256
    Scram256,
    /// SASL SCRAM-SHA-512
    Scram512,
}

impl KafkaAuthType {
    /// The librdkafka `sasl.mechanism` value, when authentication is enabled
    pub fn sasl_mechanism(&self) -> Option<&'static str> {
        match self {
            KafkaAuthType::None => None,
            KafkaAuthType::Plain => Some("PLAIN"),
            KafkaAuthType::Scram256 => Some("SCRAM-SHA-256"),
            KafkaAuthType::Scram512 => Some("SCRAM-SHA-512"),
        }
    }
}

/// Consumer start position when no committed offset exists
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StartOffset {
    /// Earliest available message
    First,
    /// Only messages produced after the consumer joins
    #[default]
    Last,
}

impl StartOffset {
    /// The librdkafka `auto.offset.reset` value
    pub fn auto_offset_reset(&self) -> &'static str {
        match self {
            StartOffset::First => "earliest",
            StartOffset::Last => "latest",
        }
    }
}

/// Transactional read isolation
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum IsolationLevel {
    /// Only committed messages are visible
    #[default]
    Committed,
    /// Aborted transactional messages are visible too
    Uncommitted,
}

impl IsolationLevel {
    /// The librdkafka `isolation.level` value
    pub fn kafka_value(&self) -> &'static str {
        match self {
            IsolationLevel::Committed => "read_committed",
            IsolationLevel::Uncommitted => "read_uncommitted",
        }
    }

    /// Parse the configuration string form
    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "committed" | "" => Ok(IsolationLevel::Committed),
            "uncommitted" => Ok(IsolationLevel::Uncommitted),
            other => Err(Error::Config(Box::new(figment::Error::from(format!(
                "invalid isolation level: {}",
                other
            ))))),
        }
    }
}

/// Kafka consumer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KafkaConsumerConfig {
    /// Broker addresses
    pub brokers: Vec<String>,

    /// Topic to consume (single-topic form)
    #[serde(default)]
    pub topic: Option<String>,

    /// Consumer group id
    #[serde(default)]
    pub group: Option<String>,

    /// Topics to consume as a group (multi-topic form)
    #[serde(default)]
    pub group_topics: Vec<String>,

    /// Explicit partition assignment (optional)
    #[serde(default)]
    pub partition: Option<i32>,

    /// SASL mechanism
    #[serde(default)]
    pub auth_type: KafkaAuthType,

    /// SASL username
    #[serde(default)]
    pub username: Option<String>,

    /// SASL password
    #[serde(default)]
    pub password: Option<String>,

    /// Start position when no committed offset exists
    #[serde(default)]
    pub start_offset: StartOffset,

    /// Transactional read isolation
    #[serde(default)]
    pub isolation_level: IsolationLevel,

    /// Group session timeout in milliseconds
    #[serde(default = "default_kafka_session_timeout_ms")]
    pub session_timeout_ms: u64,

    /// Group heartbeat interval in milliseconds
    #[serde(default = "default_kafka_heartbeat_ms")]
    pub heartbeat_interval_ms: u64,

    /// Maximum delay between polls before the group evicts the member
    #[serde(default = "default_kafka_max_poll_interval_ms")]
    pub max_poll_interval_ms: u64,

    /// Maximum broker fetch wait in milliseconds
    #[serde(default = "default_kafka_max_wait_ms")]
    pub max_wait_ms: u64,
}

impl KafkaConsumerConfig {
    /// Topics this consumer subscribes to
    pub fn topics(&self) -> Vec<&str> {
        if !self.group_topics.is_empty() {
            self.group_topics.iter().map(String::as_str).collect()
        } else {
            self.topic.iter().map(String::as_str).collect()
        }
    }

    /// Validate the configuration; fatal at construction
    pub fn validate(&self) -> Result<()> {
        if self.brokers.is_empty() {
            return Err(config_error("kafka consumer requires at least one broker"));
        }
        if self.topic.is_none() && self.group_topics.is_empty() {
            return Err(config_error("kafka consumer requires a topic or group_topics"));
        }
        if self.auth_type != KafkaAuthType::None
            && (self.username.is_none() || self.password.is_none())
        {
            return Err(config_error(
                "kafka SASL authentication requires username and password",
            ));
        }
        Ok(())
    }
}

/// Kafka producer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KafkaProducerConfig {
    /// Broker addresses
    pub brokers: Vec<String>,

    /// Topic written to by the convenience write methods
    pub topic: String,

    /// SASL mechanism
    #[serde(default)]
    pub auth_type: KafkaAuthType,

    /// SASL username
    #[serde(default)]
    pub username: Option<String>,

    /// SASL password
    #[serde(default)]
    pub password: Option<String>,

    /// Per-message delivery timeout in milliseconds
    #[serde(default = "default_kafka_message_timeout_ms")]
    pub message_timeout_ms: u64,
}

impl KafkaProducerConfig {
    /// Validate the configuration; fatal at construction
    pub fn validate(&self) -> Result<()> {
        if self.brokers.is_empty() {
            return Err(config_error("kafka producer requires at least one broker"));
        }
        if self.topic.is_empty() {
            return Err(config_error("kafka producer requires a topic"));
        }
        if self.auth_type != KafkaAuthType::None
            && (self.username.is_none() || self.password.is_none())
        {
            return Err(config_error(
                "kafka SASL authentication requires username and password",
            ));
        }
        Ok(())
    }
}

fn config_error(message: &str) -> Error {
    Error::Config(Box::new(figment::Error::from(message.to_string())))
}

// Default value functions
fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_environment() -> String {
    "dev".to_string()
}

fn default_request_timeout() -> u64 {
    600
}

fn default_cookie_name() -> String {
    "session_id".to_string()
}

fn default_expiration_secs() -> u64 {
    86400 // 24 hours
}

fn default_idle_timeout_secs() -> u64 {
    3600
}

fn default_same_site() -> String {
    "lax".to_string()
}

fn default_cookie_path() -> String {
    "/".to_string()
}

fn default_jwt_algorithm() -> String {
    "HS256".to_string()
}

fn default_jwt_expiration_secs() -> u64 {
    3600
}

fn default_key_interval_secs() -> u64 {
    300 // 5 minutes
}

fn default_max_input_bytes() -> usize {
    10 * 1024 * 1024 // 10 MiB
}

fn default_nonce_ttl_secs() -> u64 {
    600
}

fn default_nonce_capacity() -> usize {
    100_000
}

fn default_hash_header() -> String {
    "X-HMAC-Hash".to_string()
}

fn default_timestamp_header() -> String {
    "X-HMAC-Timestamp".to_string()
}

fn default_nonce_header() -> String {
    "X-HMAC-Nonce".to_string()
}

fn default_requests_per_minute() -> u32 {
    60
}

fn default_burst() -> u32 {
    5
}

fn default_xss_protection() -> String {
    "1; mode=block".to_string()
}

fn default_frame_options() -> String {
    "DENY".to_string()
}

fn default_referrer_policy() -> String {
    "strict-origin-when-cross-origin".to_string()
}

fn default_hsts_max_age() -> u64 {
    31_536_000 // 1 year
}

fn default_body_limit_mb() -> usize {
    10 // 10 MB
}

fn default_cors_mode() -> String {
    "permissive".to_string()
}

fn default_redis_max_connections() -> usize {
    20
}

fn default_connection_timeout() -> u64 {
    10
}

fn default_max_retries() -> u32 {
    5
}

fn default_retry_delay() -> u64 {
    2
}

fn default_kafka_session_timeout_ms() -> u64 {
    30_000
}

fn default_kafka_heartbeat_ms() -> u64 {
    3_000
}

fn default_kafka_max_poll_interval_ms() -> u64 {
    300_000
}

fn default_kafka_max_wait_ms() -> u64 {
    500
}

fn default_kafka_message_timeout_ms() -> u64 {
    5_000
}

fn default_true() -> bool {
    true
}

fn default_false() -> bool {
    false
}

impl Config {
    /// Load configuration from all sources
    ///
    /// Searches for config files in this order (first found is used):
    /// 1. Current working directory: ./config.toml
    /// 2. XDG config directory: ~/.config/blueprint/{service_name}/config.toml
    /// 3. System directory: /etc/blueprint/{service_name}/config.toml
    ///
    /// Environment variables (BLUEPRINT_ prefix) override all file-based configs.
    pub fn load() -> Result<Self> {
        let service_name = std::env::current_exe()
            .ok()
            .and_then(|p| p.file_stem().map(|s| s.to_string_lossy().into_owned()))
            .unwrap_or_else(|| "blueprint".to_string());

        Self::load_for_service(&service_name)
    }

    /// Load configuration for a specific service name
    pub fn load_for_service(service_name: &str) -> Result<Self> {
        let config_paths = Self::find_config_paths(service_name);

        let mut figment = Figment::new().merge(Serialized::defaults(Config::default()));

        // Merge config files in reverse order (lowest priority first)
        // so that higher priority files override lower ones
        for path in config_paths.iter().rev() {
            if path.exists() {
                tracing::info!("Loading configuration from: {}", path.display());
                figment = figment.merge(Toml::file(path));
            }
        }

        // Environment variables have highest priority
        figment = figment.merge(Env::prefixed("BLUEPRINT_").split("_"));

        let config = figment.extract()?;
        Ok(config)
    }

    /// Load configuration from a specific file
    ///
    /// This bypasses XDG directories and loads directly from the given path.
    /// Useful for testing or non-standard deployments.
    pub fn load_from(path: &str) -> Result<Self> {
        let config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("BLUEPRINT_").split("_"))
            .extract()?;

        Ok(config)
    }

    fn find_config_paths(service_name: &str) -> Vec<PathBuf> {
        let mut paths = Vec::new();

        // 1. Current working directory (highest priority for dev/testing)
        paths.push(PathBuf::from("config.toml"));

        // 2. XDG config directory (~/.config/blueprint/{service_name}/config.toml)
        let xdg_dirs = xdg::BaseDirectories::with_prefix("blueprint");
        let config_file_path = Path::new(service_name).join("config.toml");
        if let Ok(path) = xdg_dirs.place_config_file(&config_file_path) {
            paths.push(path);
        }

        // 3. System-wide directory (/etc/blueprint/{service_name}/config.toml)
        paths.push(
            PathBuf::from("/etc/blueprint")
                .join(service_name)
                .join("config.toml"),
        );

        paths
    }

    /// Get Redis URL
    pub fn redis_url(&self) -> Option<&str> {
        self.redis.as_ref().map(|r| r.url.as_str())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service: ServiceConfig {
                name: "blueprint".to_string(),
                log_level: default_log_level(),
                environment: default_environment(),
            },
            server: ServerConfig {
                host: default_host(),
                port: default_port(),
                debug: false,
                read_timeout_secs: default_request_timeout(),
                write_timeout_secs: default_request_timeout(),
                trusted_proxies: Vec::new(),
                options: HashMap::new(),
                tls: None,
            },
            session: SessionConfig::default(),
            jwt: JwtConfig::default(),
            hmac: HmacConfig::default(),
            rate_limit: RateLimitConfig::default(),
            security_headers: SecurityHeadersConfig::default(),
            middleware: MiddlewareConfig::default(),
            redis: None,
            kafka_consumer: None,
            kafka_producer: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.read_timeout_secs, 600);
        assert_eq!(config.session.expiration_secs, 86400);
        assert_eq!(config.hmac.key_interval_secs, 300);
        assert_eq!(config.rate_limit.burst, 5);
    }

    #[test]
    fn test_server_options_accessors() {
        let mut config = Config::default();
        assert_eq!(config.server.auth_token_header(), "X-API-Key");
        assert_eq!(config.server.auth_token_secret(), "");

        config.server.options.insert(
            "authTokenHeader".to_string(),
            serde_json::json!("X-Service-Key"),
        );
        config
            .server
            .options
            .insert("authTokenSecret".to_string(), serde_json::json!("s3cret"));
        assert_eq!(config.server.auth_token_header(), "X-Service-Key");
        assert_eq!(config.server.auth_token_secret(), "s3cret");
    }

    #[test]
    fn test_nonce_ttl_clamped_to_twice_interval() {
        let hmac = HmacConfig {
            key_interval_secs: 600,
            nonce_ttl_secs: 60,
            ..HmacConfig::default()
        };
        assert_eq!(hmac.nonce_ttl(), Duration::from_secs(1200));
    }

    #[test]
    fn test_isolation_level_mapping() {
        assert_eq!(IsolationLevel::Committed.kafka_value(), "read_committed");
        assert_eq!(
            IsolationLevel::Uncommitted.kafka_value(),
            "read_uncommitted"
        );
        assert_eq!(
            IsolationLevel::parse("committed").unwrap(),
            IsolationLevel::Committed
        );
        assert_eq!(
            IsolationLevel::parse("").unwrap(),
            IsolationLevel::Committed
        );
        assert!(IsolationLevel::parse("latest").is_err());
    }

    #[test]
    fn test_start_offset_mapping() {
        assert_eq!(StartOffset::First.auto_offset_reset(), "earliest");
        assert_eq!(StartOffset::Last.auto_offset_reset(), "latest");
        assert_eq!(StartOffset::default(), StartOffset::Last);
    }

    #[test]
    fn test_kafka_consumer_validation() {
        let mut config = KafkaConsumerConfig {
            brokers: vec!["localhost:9092".to_string()],
            topic: Some("orders".to_string()),
            group: Some("billing".to_string()),
            group_topics: Vec::new(),
            partition: None,
            auth_type: KafkaAuthType::None,
            username: None,
            password: None,
            start_offset: StartOffset::default(),
            isolation_level: IsolationLevel::default(),
            session_timeout_ms: 30_000,
            heartbeat_interval_ms: 3_000,
            max_poll_interval_ms: 300_000,
            max_wait_ms: 500,
        };
        assert!(config.validate().is_ok());

        config.brokers.clear();
        assert!(config.validate().is_err());

        config.brokers = vec!["localhost:9092".to_string()];
        config.auth_type = KafkaAuthType::Scram512;
        assert!(config.validate().is_err());

        config.username = Some("svc".to_string());
        config.password = Some("pw".to_string());
        assert!(config.validate().is_ok());
        assert_eq!(config.auth_type.sasl_mechanism(), Some("SCRAM-SHA-512"));
    }
}
