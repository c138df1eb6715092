use anyhow::{Context, Result};
use aws_config::Region;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::pipeline::OrderingPolicy;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Object storage holding sources and derived artifacts
    pub storage: StorageConfig,

    /// AWS Transcribe settings
    pub transcription: TranscriptionConfig,

    /// LLM generation settings
    pub generation: GenerationConfig,

    /// Bluesky publishing settings
    pub social: SocialConfig,

    /// Stage toggles and pipeline behaviour
    pub pipeline: PipelineConfig,

    /// Application settings
    pub app: AppConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// MinIO/S3 endpoint, with or without scheme (e.g. `localhost:9000`)
    pub endpoint: String,
    pub access_key: String,
    pub secret_key: String,
    pub bucket: String,
    /// Use HTTPS when the endpoint has no scheme
    pub secure: bool,
    pub region: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionConfig {
    /// AWS region for Transcribe and its staging bucket
    pub region: String,

    /// S3 bucket used to stage audio for Transcribe
    pub s3_bucket: String,

    /// Optional S3 key prefix
    pub s3_key_prefix: Option<String>,

    /// Language code (auto-detect if not specified)
    pub default_language: Option<String>,

    /// Maximum transcript segment length in seconds
    pub max_segment_length: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    pub ollama_url: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,

    /// Directory holding the prompt templates (built-in defaults when unset)
    pub prompts_dir: Option<PathBuf>,

    /// Iteration budget of the social post validation loop
    pub post_max_iterations: u32,

    /// Hard grapheme limit for generated social posts
    pub post_max_graphemes: usize,

    /// Minimum hashtag count for generated social posts
    pub post_min_hashtags: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SocialConfig {
    pub handle: String,
    pub password: String,
    pub service_url: String,
    pub video_service_url: String,

    /// Publish the generated post after it is stored
    pub enable_publish: bool,

    /// Platform text limit in graphemes
    pub text_limit: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Extension the source video must carry
    pub source_extension: String,

    /// Generate the short clip with thumbnail intro
    pub enable_short_clip: bool,

    /// Deadline for a single stage
    pub stage_timeout_secs: u64,

    /// Audio conversion parameters
    pub sample_rate: u32,
    pub channels: u8,

    /// Folder holding playlist manifests
    pub playlist_folder: String,

    /// Folder playlist videos are read from
    pub downloads_folder: String,

    /// Order in which playlist entries are processed
    pub ordering: OrderingPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Temporary directory for working areas
    pub temp_dir: Option<PathBuf>,

    /// Maximum concurrent jobs in a batch
    pub max_concurrent_jobs: usize,

    /// Default log filter level
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage: StorageConfig {
                endpoint: "localhost:9000".to_string(),
                access_key: "minioadmin".to_string(),
                secret_key: "minioadmin".to_string(),
                bucket: "videos".to_string(),
                secure: false,
                region: "us-east-1".to_string(),
            },
            transcription: TranscriptionConfig {
                region: "us-east-1".to_string(),
                s3_bucket: "".to_string(),
                s3_key_prefix: Some("reelsmith/".to_string()),
                default_language: None,
                max_segment_length: 10.0,
            },
            generation: GenerationConfig {
                ollama_url: "http://localhost:11434".to_string(),
                model: "gpt-oss:20b".to_string(),
                temperature: 0.7,
                max_tokens: 200_000,
                prompts_dir: None,
                post_max_iterations: 5,
                post_max_graphemes: 290,
                post_min_hashtags: 2,
            },
            social: SocialConfig {
                handle: "".to_string(),
                password: "".to_string(),
                service_url: "https://bsky.social".to_string(),
                video_service_url: "https://video.bsky.app".to_string(),
                enable_publish: false,
                text_limit: 299,
            },
            pipeline: PipelineConfig {
                source_extension: "mp4".to_string(),
                enable_short_clip: false,
                stage_timeout_secs: 3600,
                sample_rate: 16000,
                channels: 1,
                playlist_folder: "playlists".to_string(),
                downloads_folder: "downloads".to_string(),
                ordering: OrderingPolicy::OldestFirst,
            },
            app: AppConfig {
                temp_dir: None,
                max_concurrent_jobs: 1,
                log_level: "info".to_string(),
            },
        }
    }
}

/// How an override's raw environment string is coerced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverrideKind {
    Int,
    Float,
    Bool,
    Str,
}

/// A coerced override value
#[derive(Debug, Clone, PartialEq)]
pub enum OverrideValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
}

impl OverrideValue {
    fn int(&self) -> i64 {
        match self {
            OverrideValue::Int(value) => *value,
            _ => 0,
        }
    }

    fn float(&self) -> f64 {
        match self {
            OverrideValue::Float(value) => *value,
            _ => 0.0,
        }
    }

    fn flag(&self) -> bool {
        matches!(self, OverrideValue::Bool(true))
    }

    fn string(self) -> String {
        match self {
            OverrideValue::Str(value) => value,
            _ => String::new(),
        }
    }
}

impl OverrideKind {
    /// Coerce a raw string, `None` when it does not parse as this kind
    pub fn coerce(self, raw: &str) -> Option<OverrideValue> {
        let raw = raw.trim();
        match self {
            OverrideKind::Int => raw.parse().ok().map(OverrideValue::Int),
            OverrideKind::Float => raw.parse().ok().map(OverrideValue::Float),
            OverrideKind::Bool => Some(OverrideValue::Bool(matches!(
                raw.to_lowercase().as_str(),
                "true" | "1" | "yes" | "on"
            ))),
            OverrideKind::Str => Some(OverrideValue::Str(raw.to_string())),
        }
    }
}

/// One environment variable that may override a config field
pub struct EnvOverride {
    pub key: &'static str,
    pub kind: OverrideKind,
    /// Returns `false` when the value is out of range for the field
    apply: fn(&mut Config, OverrideValue) -> bool,
}

/// Assign an override; always succeeds
fn set<T>(field: &mut T, value: T) -> bool {
    *field = value;
    true
}

/// Assign an integer override only when it is at least `min` and fits the field
fn set_at_least<T: TryFrom<i64>>(field: &mut T, value: &OverrideValue, min: i64) -> bool {
    let raw = value.int();
    if raw < min {
        return false;
    }
    match T::try_from(raw) {
        Ok(converted) => set(field, converted),
        Err(_) => false,
    }
}

/// Every environment variable the configuration honours
pub const ENV_OVERRIDES: &[EnvOverride] = &[
    EnvOverride {
        key: "MINIO_ENDPOINT",
        kind: OverrideKind::Str,
        apply: |c, v| set(&mut c.storage.endpoint, v.string()),
    },
    EnvOverride {
        key: "MINIO_ACCESS_KEY",
        kind: OverrideKind::Str,
        apply: |c, v| set(&mut c.storage.access_key, v.string()),
    },
    EnvOverride {
        key: "MINIO_SECRET_KEY",
        kind: OverrideKind::Str,
        apply: |c, v| set(&mut c.storage.secret_key, v.string()),
    },
    EnvOverride {
        key: "MINIO_BUCKET",
        kind: OverrideKind::Str,
        apply: |c, v| set(&mut c.storage.bucket, v.string()),
    },
    EnvOverride {
        key: "MINIO_SECURE",
        kind: OverrideKind::Bool,
        apply: |c, v| set(&mut c.storage.secure, v.flag()),
    },
    EnvOverride {
        key: "MINIO_REGION",
        kind: OverrideKind::Str,
        apply: |c, v| set(&mut c.storage.region, v.string()),
    },
    EnvOverride {
        key: "OLLAMA_URL",
        kind: OverrideKind::Str,
        apply: |c, v| set(&mut c.generation.ollama_url, v.string()),
    },
    EnvOverride {
        key: "OLLAMA_MODEL",
        kind: OverrideKind::Str,
        apply: |c, v| set(&mut c.generation.model, v.string()),
    },
    EnvOverride {
        key: "OLLAMA_TEMPERATURE",
        kind: OverrideKind::Float,
        apply: |c, v| set(&mut c.generation.temperature, v.float() as f32),
    },
    EnvOverride {
        key: "OLLAMA_MAX_TOKENS",
        kind: OverrideKind::Int,
        apply: |c, v| set_at_least(&mut c.generation.max_tokens, &v, 1),
    },
    EnvOverride {
        key: "BLUESKY_HANDLE",
        kind: OverrideKind::Str,
        apply: |c, v| set(&mut c.social.handle, v.string()),
    },
    EnvOverride {
        key: "BLUESKY_PASSWORD",
        kind: OverrideKind::Str,
        apply: |c, v| set(&mut c.social.password, v.string()),
    },
    EnvOverride {
        key: "BLUESKY_SERVICE_URL",
        kind: OverrideKind::Str,
        apply: |c, v| set(&mut c.social.service_url, v.string()),
    },
    EnvOverride {
        key: "TRANSCRIBE_REGION",
        kind: OverrideKind::Str,
        apply: |c, v| set(&mut c.transcription.region, v.string()),
    },
    EnvOverride {
        key: "TRANSCRIBE_BUCKET",
        kind: OverrideKind::Str,
        apply: |c, v| set(&mut c.transcription.s3_bucket, v.string()),
    },
    EnvOverride {
        key: "TRANSCRIBE_LANGUAGE",
        kind: OverrideKind::Str,
        apply: |c, v| set(&mut c.transcription.default_language, Some(v.string())),
    },
    EnvOverride {
        key: "PROMPTS_DIR",
        kind: OverrideKind::Str,
        apply: |c, v| set(&mut c.generation.prompts_dir, Some(PathBuf::from(v.string()))),
    },
    EnvOverride {
        key: "POST_MAX_ITERATIONS",
        kind: OverrideKind::Int,
        apply: |c, v| set_at_least(&mut c.generation.post_max_iterations, &v, 1),
    },
    EnvOverride {
        key: "STAGE_TIMEOUT_SECS",
        kind: OverrideKind::Int,
        apply: |c, v| set_at_least(&mut c.pipeline.stage_timeout_secs, &v, 1),
    },
    EnvOverride {
        key: "ENABLE_SHORT_CLIP",
        kind: OverrideKind::Bool,
        apply: |c, v| set(&mut c.pipeline.enable_short_clip, v.flag()),
    },
    EnvOverride {
        key: "ENABLE_SOCIAL_PUBLISH",
        kind: OverrideKind::Bool,
        apply: |c, v| set(&mut c.social.enable_publish, v.flag()),
    },
    EnvOverride {
        key: "MAX_CONCURRENT_JOBS",
        kind: OverrideKind::Int,
        apply: |c, v| set_at_least(&mut c.app.max_concurrent_jobs, &v, 1),
    },
    EnvOverride {
        key: "LOG_LEVEL",
        kind: OverrideKind::Str,
        apply: |c, v| set(&mut c.app.log_level, v.string().to_lowercase()),
    },
];

impl Config {
    /// Load configuration from file or create default, then apply environment overrides
    pub async fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        let mut config = if config_path.exists() {
            let content = fs_err::read_to_string(&config_path)
                .context("Failed to read config file")?;

            serde_yaml::from_str::<Config>(&content)
                .context("Failed to parse config file")?
        } else {
            let config = Self::default();
            config.save().await?;
            config
        };

        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Apply every known override that `lookup` yields a value for
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        for entry in ENV_OVERRIDES {
            let Some(raw) = lookup(entry.key) else {
                continue;
            };

            match entry.kind.coerce(&raw) {
                Some(value) => {
                    if (entry.apply)(self, value) {
                        tracing::debug!(key = entry.key, "Applied config override");
                    } else {
                        tracing::warn!(
                            "Out of range value for {}: {:?}, keeping configured value",
                            entry.key,
                            raw
                        );
                    }
                }
                None => {
                    tracing::warn!(
                        "Invalid {:?} value for {}: {:?}, keeping configured value",
                        entry.kind,
                        entry.key,
                        raw
                    );
                }
            }
        }
    }

    /// Save configuration to file
    pub async fn save(&self) -> Result<()> {
        let config_path = Self::config_path()?;

        if let Some(parent) = config_path.parent() {
            fs_err::create_dir_all(parent)?;
        }

        let content = serde_yaml::to_string(self)
            .context("Failed to serialize config")?;

        fs_err::write(&config_path, content)
            .context("Failed to write config file")?;

        Ok(())
    }

    /// Get configuration file path
    pub fn config_path() -> Result<PathBuf> {
        // First try current directory for easy testing
        let local_config = PathBuf::from("config.yaml");
        if local_config.exists() {
            return Ok(local_config);
        }

        let config_dir = dirs::config_dir()
            .context("Could not determine config directory")?;

        Ok(config_dir.join("reelsmith").join("config.yaml"))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.storage.bucket.is_empty() {
            anyhow::bail!("Storage bucket must be configured");
        }

        if self.generation.post_max_iterations == 0 {
            anyhow::bail!("post_max_iterations must be at least 1");
        }

        if self.generation.post_max_graphemes < 4 {
            anyhow::bail!("post_max_graphemes must leave room for an ellipsis");
        }

        crate::utils::validate_and_normalize_url(&self.generation.ollama_url)
            .context("Invalid ollama_url")?;
        crate::utils::validate_and_normalize_url(&self.social.service_url)
            .context("Invalid Bluesky service_url")?;

        Ok(())
    }

    /// Display current configuration
    pub fn display(&self) {
        println!("Current Configuration:");
        println!("  Storage Endpoint: {}", self.storage.endpoint);
        println!("  Storage Bucket: {}", self.storage.bucket);
        println!("  Storage Secret: {}", mask(&self.storage.secret_key));
        println!("  Transcribe Region: {}", self.transcription.region);
        if !self.transcription.s3_bucket.is_empty() {
            println!("  Transcribe Bucket: {}", self.transcription.s3_bucket);
        }
        println!("  Ollama: {} ({})", self.generation.ollama_url, self.generation.model);
        println!("  Post Iterations: {}", self.generation.post_max_iterations);
        println!("  Bluesky Handle: {}", self.social.handle);
        println!("  Bluesky Password: {}", mask(&self.social.password));
        println!("  Publish Posts: {}", self.social.enable_publish);
        println!("  Short Clip Stage: {}", self.pipeline.enable_short_clip);
        println!("  Playlist Order: {}", self.pipeline.ordering);
        println!("  Concurrent Jobs: {}", self.app.max_concurrent_jobs);
    }

    /// Get AWS region for transcription
    pub fn aws_region(&self) -> Region {
        Region::new(self.transcription.region.clone())
    }
}

fn mask(secret: &str) -> &'static str {
    if secret.is_empty() {
        "(not set)"
    } else {
        "********"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_overrides_coerce_by_kind() {
        let mut config = Config::default();
        config.apply_overrides(lookup_from(&[
            ("MINIO_BUCKET", "media"),
            ("MINIO_SECURE", "YES"),
            ("OLLAMA_TEMPERATURE", "0.25"),
            ("OLLAMA_MAX_TOKENS", "4096"),
            ("ENABLE_SHORT_CLIP", "on"),
            ("POST_MAX_ITERATIONS", "3"),
        ]));

        assert_eq!(config.storage.bucket, "media");
        assert!(config.storage.secure);
        assert_eq!(config.generation.temperature, 0.25);
        assert_eq!(config.generation.max_tokens, 4096);
        assert!(config.pipeline.enable_short_clip);
        assert_eq!(config.generation.post_max_iterations, 3);
    }

    #[test]
    fn test_unparseable_numeric_override_is_ignored() {
        let mut config = Config::default();
        config.apply_overrides(lookup_from(&[
            ("OLLAMA_MAX_TOKENS", "lots"),
            ("OLLAMA_TEMPERATURE", "warm"),
        ]));

        assert_eq!(config.generation.max_tokens, 200_000);
        assert_eq!(config.generation.temperature, 0.7);
    }

    #[test]
    fn test_out_of_range_integer_override_is_ignored() {
        let mut config = Config::default();
        config.apply_overrides(lookup_from(&[
            ("OLLAMA_MAX_TOKENS", "4294967296"),
            ("POST_MAX_ITERATIONS", "-3"),
            ("MAX_CONCURRENT_JOBS", "0"),
            ("STAGE_TIMEOUT_SECS", "90"),
        ]));

        assert_eq!(config.generation.max_tokens, 200_000);
        assert_eq!(config.generation.post_max_iterations, 5);
        assert_eq!(config.app.max_concurrent_jobs, 1);
        assert_eq!(config.pipeline.stage_timeout_secs, 90);
    }

    #[test]
    fn test_bool_override_treats_unknown_words_as_false() {
        let mut config = Config::default();
        config.social.enable_publish = true;
        config.apply_overrides(lookup_from(&[("ENABLE_SOCIAL_PUBLISH", "maybe")]));
        assert!(!config.social.enable_publish);
    }

    #[test]
    fn test_override_keys_are_unique() {
        let mut keys: Vec<_> = ENV_OVERRIDES.iter().map(|o| o.key).collect();
        keys.sort_unstable();
        let before = keys.len();
        keys.dedup();
        assert_eq!(before, keys.len());
    }

    #[test]
    fn test_validate_rejects_zero_iteration_budget() {
        let mut config = Config::default();
        config.generation.post_max_iterations = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_round_trips_through_yaml() {
        let config = Config::default();
        let yaml = serde_yaml::to_string(&config).unwrap();
        let parsed: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed.pipeline.ordering, OrderingPolicy::OldestFirst);
        assert_eq!(parsed.generation.post_max_graphemes, 290);
    }
}
