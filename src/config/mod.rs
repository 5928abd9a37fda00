//! Server configuration.
//!
//! Configuration is assembled from three sources. Priority (highest to
//! lowest): YAML file values, environment variables (actual ENV vars
//! override `.env` values), defaults. The `.env` file is loaded in `main.rs`
//! at startup, so by the time this module runs everything is an environment
//! variable.
//!
//! # Example YAML structure
//! ```yaml
//! server:
//!   host: "0.0.0.0"
//!   port: 8000
//!   public_base_url: "https://relay.example.com"
//!
//! telephony:
//!   endpoint: "https://acs.example.com"
//!   access_token: "token"
//!   source_phone_number: "+15551230000"
//!
//! voice_ai:
//!   endpoint: "https://example.cognitiveservices.azure.com"
//!   api_key: "key"
//!   model: "gpt-realtime"
//!   voice: "en-US-Ava:DragonHDLatestNeural"
//!   instructions: "You are Ava, an AI voice assistant."
//!
//! recording:
//!   s3_bucket: "call-recordings"
//!   s3_region: "us-west-2"
//!   s3_prefix: "recordings"
//! ```

use std::path::PathBuf;

use serde::Deserialize;

/// TLS configuration for HTTPS and WSS
#[derive(Debug, Clone)]
pub struct TlsConfig {
    /// Path to the TLS certificate file (PEM format)
    pub cert_path: PathBuf,
    /// Path to the TLS private key file (PEM format)
    pub key_path: PathBuf,
}

/// Server configuration
///
/// Contains everything needed to run the relay: listener settings, the
/// public base URL the telephony vendor calls back to, vendor credentials
/// for call control and the voice-AI endpoint, per-process limits, and
/// recording storage.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    // Server settings
    pub host: String,
    pub port: u16,
    pub tls: Option<TlsConfig>,

    /// Externally reachable base URL; webhook callbacks and the media
    /// transport URL are derived from it
    pub public_base_url: String,

    // Telephony settings
    pub telephony_endpoint: Option<String>,
    pub telephony_access_token: Option<String>,
    /// Caller id for outbound calls; also the number inbound callers dial
    pub source_phone_number: Option<String>,

    // Voice-AI settings
    pub voice_ai_endpoint: Option<String>,
    pub voice_ai_api_key: Option<String>,
    pub voice_ai_model: String,
    pub voice_ai_voice: String,
    /// Default agenda used when a request carries none; also the initial
    /// inbound agenda
    pub default_instructions: String,

    // Limits
    pub max_concurrent_calls: usize,
    pub dial_timeout_seconds: u64,
    pub event_buffer_capacity: usize,
    pub max_ws_connections: usize,

    // Security settings
    pub cors_allowed_origins: Vec<String>,
    pub rate_limit_requests_per_second: u64,
    pub rate_limit_burst_size: u32,

    // Recording storage (S3-compatible)
    pub s3_bucket: Option<String>,
    pub s3_region: Option<String>,
    pub s3_prefix: Option<String>,
    pub s3_endpoint: Option<String>,
    pub s3_access_key: Option<String>,
    pub s3_secret_key: Option<String>,
}

/// Zeroize secret fields when the config is dropped.
impl Drop for ServerConfig {
    fn drop(&mut self) {
        use zeroize::Zeroize;

        if let Some(ref mut token) = self.telephony_access_token {
            token.zeroize();
        }
        if let Some(ref mut key) = self.voice_ai_api_key {
            key.zeroize();
        }
        if let Some(ref mut key) = self.s3_access_key {
            key.zeroize();
        }
        if let Some(ref mut key) = self.s3_secret_key {
            key.zeroize();
        }
    }
}

/// YAML configuration file structure. All fields optional so a partial file
/// can override just a few environment values.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct YamlConfig {
    #[serde(default)]
    pub server: YamlServer,
    #[serde(default)]
    pub telephony: YamlTelephony,
    #[serde(default)]
    pub voice_ai: YamlVoiceAi,
    #[serde(default)]
    pub limits: YamlLimits,
    #[serde(default)]
    pub security: YamlSecurity,
    #[serde(default)]
    pub recording: YamlRecording,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct YamlServer {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub public_base_url: Option<String>,
    pub tls_cert_path: Option<PathBuf>,
    pub tls_key_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct YamlTelephony {
    pub endpoint: Option<String>,
    pub access_token: Option<String>,
    pub source_phone_number: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct YamlVoiceAi {
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub voice: Option<String>,
    pub instructions: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct YamlLimits {
    pub max_concurrent_calls: Option<usize>,
    pub dial_timeout_seconds: Option<u64>,
    pub event_buffer_capacity: Option<usize>,
    pub max_ws_connections: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct YamlSecurity {
    pub cors_allowed_origins: Option<Vec<String>>,
    pub rate_limit_requests_per_second: Option<u64>,
    pub rate_limit_burst_size: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct YamlRecording {
    pub s3_bucket: Option<String>,
    pub s3_region: Option<String>,
    pub s3_prefix: Option<String>,
    pub s3_endpoint: Option<String>,
    pub s3_access_key: Option<String>,
    pub s3_secret_key: Option<String>,
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>, String> {
    match env_string(key) {
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|_| format!("invalid value for {key}: {raw}")),
        None => Ok(None),
    }
}

impl ServerConfig {
    /// Load configuration from environment variables only.
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        Self::build(YamlConfig::default())
    }

    /// Load configuration from a YAML file with environment variable base.
    pub fn from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| format!("failed to read config file {}: {e}", path.display()))?;
        let yaml: YamlConfig = serde_yaml::from_str(&contents)
            .map_err(|e| format!("failed to parse config file {}: {e}", path.display()))?;
        Self::build(yaml)
    }

    fn build(yaml: YamlConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let port = yaml
            .server
            .port
            .or(env_parse::<u16>("PORT")?)
            .unwrap_or(8000);

        let tls = match (yaml.server.tls_cert_path, yaml.server.tls_key_path) {
            (Some(cert_path), Some(key_path)) => Some(TlsConfig {
                cert_path,
                key_path,
            }),
            (None, None) => match (env_string("TLS_CERT_PATH"), env_string("TLS_KEY_PATH")) {
                (Some(cert), Some(key)) => Some(TlsConfig {
                    cert_path: PathBuf::from(cert),
                    key_path: PathBuf::from(key),
                }),
                (None, None) => None,
                _ => return Err("TLS requires both TLS_CERT_PATH and TLS_KEY_PATH".into()),
            },
            _ => return Err("TLS requires both cert and key paths".into()),
        };

        let config = Self {
            host: yaml
                .server
                .host
                .or_else(|| env_string("HOST"))
                .unwrap_or_else(|| "0.0.0.0".to_string()),
            port,
            tls,
            public_base_url: yaml
                .server
                .public_base_url
                .or_else(|| env_string("CALLBACK_URI"))
                .unwrap_or_else(|| format!("http://localhost:{port}")),
            telephony_endpoint: yaml
                .telephony
                .endpoint
                .or_else(|| env_string("TELEPHONY_ENDPOINT")),
            telephony_access_token: yaml
                .telephony
                .access_token
                .or_else(|| env_string("TELEPHONY_ACCESS_TOKEN")),
            source_phone_number: yaml
                .telephony
                .source_phone_number
                .or_else(|| env_string("SOURCE_PHONE_NUMBER")),
            voice_ai_endpoint: yaml
                .voice_ai
                .endpoint
                .or_else(|| env_string("VOICE_AI_ENDPOINT")),
            voice_ai_api_key: yaml
                .voice_ai
                .api_key
                .or_else(|| env_string("VOICE_AI_API_KEY")),
            voice_ai_model: yaml
                .voice_ai
                .model
                .or_else(|| env_string("VOICE_AI_MODEL"))
                .unwrap_or_else(|| "gpt-realtime".to_string()),
            voice_ai_voice: yaml
                .voice_ai
                .voice
                .or_else(|| env_string("VOICE_AI_VOICE"))
                .unwrap_or_else(|| "en-US-Ava:DragonHDLatestNeural".to_string()),
            default_instructions: yaml
                .voice_ai
                .instructions
                .or_else(|| env_string("VOICE_AI_INSTRUCTIONS"))
                .unwrap_or_else(|| {
                    "You are Ava, an AI voice assistant. Be concise, friendly, and professional."
                        .to_string()
                }),
            max_concurrent_calls: yaml
                .limits
                .max_concurrent_calls
                .or(env_parse("MAX_CONCURRENT_CALLS")?)
                .unwrap_or(8),
            dial_timeout_seconds: yaml
                .limits
                .dial_timeout_seconds
                .or(env_parse("DIAL_TIMEOUT_SECONDS")?)
                .unwrap_or(45),
            event_buffer_capacity: yaml
                .limits
                .event_buffer_capacity
                .or(env_parse("EVENT_BUFFER_CAPACITY")?)
                .unwrap_or(256),
            max_ws_connections: yaml
                .limits
                .max_ws_connections
                .or(env_parse("MAX_WS_CONNECTIONS")?)
                .unwrap_or(100),
            cors_allowed_origins: yaml
                .security
                .cors_allowed_origins
                .or_else(|| {
                    env_string("CORS_ALLOWED_ORIGINS")
                        .map(|v| v.split(',').map(|s| s.trim().to_string()).collect())
                })
                .unwrap_or_else(|| vec!["*".to_string()]),
            rate_limit_requests_per_second: yaml
                .security
                .rate_limit_requests_per_second
                .or(env_parse("RATE_LIMIT_RPS")?)
                .unwrap_or(50),
            rate_limit_burst_size: yaml
                .security
                .rate_limit_burst_size
                .or(env_parse("RATE_LIMIT_BURST")?)
                .unwrap_or(100),
            s3_bucket: yaml.recording.s3_bucket.or_else(|| env_string("S3_BUCKET")),
            s3_region: yaml.recording.s3_region.or_else(|| env_string("S3_REGION")),
            s3_prefix: yaml.recording.s3_prefix.or_else(|| env_string("S3_PREFIX")),
            s3_endpoint: yaml
                .recording
                .s3_endpoint
                .or_else(|| env_string("S3_ENDPOINT")),
            s3_access_key: yaml
                .recording
                .s3_access_key
                .or_else(|| env_string("S3_ACCESS_KEY")),
            s3_secret_key: yaml
                .recording
                .s3_secret_key
                .or_else(|| env_string("S3_SECRET_KEY")),
        };

        config.validate()?;
        Ok(config)
    }

    /// Build from a YAML structure directly, bypassing the process
    /// environment. Unit tests use this to get deterministic configs.
    #[cfg(test)]
    pub(crate) fn test_from_yaml(yaml: YamlConfig) -> Result<Self, Box<dyn std::error::Error>> {
        Self::build(yaml)
    }

    fn validate(&self) -> Result<(), String> {
        if self.max_concurrent_calls == 0 {
            return Err("max_concurrent_calls must be at least 1".to_string());
        }
        if self.telephony_endpoint.is_some() && self.telephony_access_token.is_none() {
            return Err("telephony endpoint configured without access token".to_string());
        }
        if self.voice_ai_endpoint.is_some() && self.voice_ai_api_key.is_none() {
            return Err("voice-AI endpoint configured without API key".to_string());
        }
        Ok(())
    }

    /// Server address as "host:port".
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn is_tls_enabled(&self) -> bool {
        self.tls.is_some()
    }

    /// Telephony control plane is usable.
    pub fn has_telephony(&self) -> bool {
        self.telephony_endpoint.is_some() && self.telephony_access_token.is_some()
    }

    /// Voice-AI endpoint is usable.
    pub fn has_voice_ai(&self) -> bool {
        self.voice_ai_endpoint.is_some() && self.voice_ai_api_key.is_some()
    }

    /// Recording storage is usable.
    pub fn has_recording_storage(&self) -> bool {
        self.s3_bucket.is_some()
    }
}
