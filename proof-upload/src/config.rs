//! Application configuration management.
//!
//! Configuration is loaded from an optional YAML file with environment variable overrides. The
//! configuration file path defaults to `config.yaml` but can be specified via `-f` flag or the
//! `PROOF_UPLOAD_CONFIG` environment variable.
//!
//! ## Loading Priority
//!
//! Configuration sources are merged in the following order (later sources override earlier ones):
//!
//! 1. **YAML config file** - Base configuration (default: `config.yaml`, may be absent)
//! 2. **Plain environment variables** - `PORT`, `GOOGLE_SERVICE_ACCOUNT_KEY_PATH` and
//!    `GOOGLE_DRIVE_FOLDER_ID`, for deployments that predate the prefixed variables
//! 3. **Prefixed environment variables** - Variables prefixed with `PROOF_UPLOAD_`
//!
//! For nested config values, use double underscores in environment variables. For example,
//! `PROOF_UPLOAD_STORAGE__GOOGLE_DRIVE__FOLDER_ID=abc` sets `storage.google_drive.folder_id`.
//!
//! ## Usage
//!
//! ```no_run
//! use clap::Parser;
//! use proof_upload::config::{Args, Config};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let args = Args::parse();
//! let config = Config::load(&args)?;
//!
//! println!("Server will bind to {}:{}", config.host, config.port);
//! # Ok(())
//! # }
//! ```
//!
//! ## Environment Variable Examples
//!
//! ```bash
//! # Drive destination and credentials
//! GOOGLE_SERVICE_ACCOUNT_KEY_PATH=/secrets/service-account.json
//! GOOGLE_DRIVE_FOLDER_ID=1AbCdEfGh
//!
//! # Raise the upload limit to 20 MiB
//! PROOF_UPLOAD_UPLOAD__MAX_FILE_SIZE=20971520
//!
//! # Run against the in-memory backend locally
//! PROOF_UPLOAD_STORAGE__BACKEND=in_memory
//! ```

use clap::Parser;
use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};
use url::Url;

use crate::errors::Error;

/// Full read/write access to Drive. Narrower scopes cannot grant permissions on files
/// the service account did not create through the picker.
pub const DRIVE_SCOPE: &str = "https://www.googleapis.com/auth/drive";

/// Simple CLI args - just for specifying config file
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file
    #[arg(short = 'f', long, env = "PROOF_UPLOAD_CONFIG", default_value = "config.yaml")]
    pub config: String,

    /// Validate configuration and exit without starting the server.
    #[arg(long)]
    pub validate: bool,
}

/// Main application configuration.
///
/// All fields have defaults, so an empty YAML file plus the Drive folder and credentials
/// is a working configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// HTTP server host to bind to (e.g., "0.0.0.0" for all interfaces)
    pub host: String,
    /// HTTP server port to bind to
    pub port: u16,
    /// Limits and policy applied to incoming uploads
    pub upload: UploadConfig,
    /// Where uploaded proofs are stored
    pub storage: StorageConfig,
    /// CORS settings for browser clients (the upload form is usually served from another origin)
    pub cors: CorsConfig,
    /// Expose Prometheus metrics at `/internal/metrics`
    pub enable_metrics: bool,
    /// Enable OpenTelemetry OTLP export for distributed tracing
    pub enable_otel_export: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            upload: UploadConfig::default(),
            storage: StorageConfig::default(),
            cors: CorsConfig::default(),
            enable_metrics: false,
            enable_otel_export: false,
        }
    }
}

/// Upload policy.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct UploadConfig {
    /// Maximum size of the uploaded file in bytes (default: 10 MiB)
    pub max_file_size: u64,
    /// Accepted MIME type prefixes. A file is accepted when its declared content type
    /// starts with any of these.
    pub allowed_mime_prefixes: Vec<String>,
    /// Delete the stored file when making it public fails.
    ///
    /// Off by default: the file stays in Drive and the client receives an error.
    pub rollback_on_permission_failure: bool,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_file_size: 10 * 1024 * 1024,
            allowed_mime_prefixes: vec!["image/".to_string()],
            rollback_on_permission_failure: false,
        }
    }
}

impl UploadConfig {
    /// Request body limit: the file limit plus room for the text fields and multipart framing.
    pub fn body_limit(&self) -> usize {
        (self.max_file_size as usize).saturating_add(1024 * 1024)
    }

    pub fn is_allowed_mime(&self, mime: &str) -> bool {
        self.allowed_mime_prefixes.iter().any(|prefix| mime.starts_with(prefix.as_str()))
    }
}

/// Which storage backend handles uploads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    /// Google Drive via the v3 REST API
    #[default]
    GoogleDrive,
    /// Process-local map, for development. Links point nowhere.
    InMemory,
}

/// Storage configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub google_drive: GoogleDriveConfig,
}

/// Google Drive backend settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct GoogleDriveConfig {
    /// Path to a service account JSON key
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_account_key_path: Option<PathBuf>,
    /// A pre-issued OAuth access token, used instead of a service account key
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    /// OAuth scopes requested for the service account
    pub scopes: Vec<String>,
    /// Drive folder that receives uploaded proofs
    pub folder_id: String,
    /// Base URL for metadata calls (permissions, deletes)
    pub api_base_url: Url,
    /// Base URL for media uploads
    pub upload_base_url: Url,
    /// Timeout applied to each call to Google
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl Default for GoogleDriveConfig {
    fn default() -> Self {
        Self {
            service_account_key_path: None,
            access_token: None,
            scopes: vec![DRIVE_SCOPE.to_string()],
            folder_id: String::new(),
            api_base_url: Url::parse("https://www.googleapis.com/").expect("static URL is valid"),
            upload_base_url: Url::parse("https://www.googleapis.com/").expect("static URL is valid"),
            request_timeout: Duration::from_secs(60),
        }
    }
}

/// CORS configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct CorsConfig {
    /// Allowed origins for CORS requests
    pub allowed_origins: Vec<CorsOrigin>,
    /// Allow credentials (cookies) in CORS requests
    pub allow_credentials: bool,
    /// Cache preflight requests for this many seconds
    pub max_age: Option<u64>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec![CorsOrigin::Wildcard],
            allow_credentials: false,
            max_age: Some(3600),
        }
    }
}

/// CORS origin specification.
///
/// Can be either a wildcard (`*`) to allow all origins, or a specific URL.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum CorsOrigin {
    /// Allow all origins (`*`)
    #[serde(deserialize_with = "parse_wildcard")]
    Wildcard,
    /// Specific origin URL (e.g., `https://shop.example.com`)
    #[serde(deserialize_with = "parse_url")]
    Url(Url),
}

fn parse_wildcard<'de, D>(deserializer: D) -> Result<(), D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    if s == "*" {
        Ok(())
    } else {
        Err(serde::de::Error::custom("Expected '*'"))
    }
}

fn parse_url<'de, D>(deserializer: D) -> Result<Url, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    Url::parse(&s).map_err(serde::de::Error::custom)
}

impl Config {
    #[allow(clippy::result_large_err)]
    pub fn load(args: &Args) -> Result<Self, figment::Error> {
        let config: Self = Self::figment(args).extract()?;
        config.validate().map_err(|e| figment::Error::from(e.to_string()))?;
        Ok(config)
    }

    /// Validate the configuration for consistency and required fields
    pub fn validate(&self) -> Result<(), Error> {
        if self.upload.max_file_size == 0 {
            return Err(Error::Internal {
                operation: "Config validation: upload.max_file_size must be greater than 0".to_string(),
            });
        }

        // An empty prefix matches every content type
        if self.upload.allowed_mime_prefixes.is_empty() || self.upload.allowed_mime_prefixes.iter().any(|p| p.trim().is_empty()) {
            return Err(Error::Internal {
                operation: "Config validation: upload.allowed_mime_prefixes must be non-empty and contain no empty prefix".to_string(),
            });
        }

        if self.storage.backend == StorageBackend::GoogleDrive {
            let drive = &self.storage.google_drive;
            match (&drive.service_account_key_path, &drive.access_token) {
                (None, None) => {
                    return Err(Error::Internal {
                        operation: "Config validation: Google Drive storage needs credentials. \
                                    Set GOOGLE_SERVICE_ACCOUNT_KEY_PATH or storage.google_drive.access_token."
                            .to_string(),
                    });
                }
                (Some(_), Some(_)) => {
                    return Err(Error::Internal {
                        operation: "Config validation: set only one of storage.google_drive.service_account_key_path \
                                    and storage.google_drive.access_token"
                            .to_string(),
                    });
                }
                _ => {}
            }

            if drive.folder_id.trim().is_empty() {
                return Err(Error::Internal {
                    operation: "Config validation: Google Drive storage needs a destination folder. \
                                Set GOOGLE_DRIVE_FOLDER_ID or storage.google_drive.folder_id."
                        .to_string(),
                });
            }

            if drive.scopes.is_empty() {
                return Err(Error::Internal {
                    operation: "Config validation: storage.google_drive.scopes cannot be empty".to_string(),
                });
            }
        }

        let has_wildcard = self.cors.allowed_origins.iter().any(|origin| matches!(origin, CorsOrigin::Wildcard));
        if has_wildcard && self.cors.allowed_origins.len() > 1 {
            return Err(Error::Internal {
                operation: "Config validation: CORS wildcard origin '*' cannot be combined with explicit origins".to_string(),
            });
        }

        if has_wildcard && self.cors.allow_credentials {
            return Err(Error::Internal {
                operation: "Config validation: CORS cannot use wildcard origin '*' with allow_credentials=true. Specify explicit origins."
                    .to_string(),
            });
        }

        Ok(())
    }

    pub fn figment(args: &Args) -> Figment {
        Figment::new()
            .merge(Yaml::file(&args.config))
            // Unprefixed variables used by older deployments
            .merge(Env::raw().only(&["PORT"]))
            .merge(
                Env::raw()
                    .only(&["GOOGLE_SERVICE_ACCOUNT_KEY_PATH"])
                    .map(|_| "storage.google_drive.service_account_key_path".into()),
            )
            .merge(
                Env::raw()
                    .only(&["GOOGLE_DRIVE_FOLDER_ID"])
                    .map(|_| "storage.google_drive.folder_id".into()),
            )
            // PROOF_UPLOAD_CONFIG names the file itself and is not a config key
            .merge(Env::prefixed("PROOF_UPLOAD_").ignore(&["config"]).split("__"))
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    fn args(path: &str) -> Args {
        Args {
            config: path.to_string(),
            validate: false,
        }
    }

    #[test]
    fn test_defaults_with_legacy_env() {
        Jail::expect_with(|jail| {
            jail.set_env("GOOGLE_SERVICE_ACCOUNT_KEY_PATH", "/secrets/sa.json");
            jail.set_env("GOOGLE_DRIVE_FOLDER_ID", "folder-123");

            let config = Config::load(&args("missing.yaml"))?;

            assert_eq!(config.host, "0.0.0.0");
            assert_eq!(config.port, 3000);
            assert_eq!(config.upload.max_file_size, 10 * 1024 * 1024);
            assert_eq!(config.upload.allowed_mime_prefixes, vec!["image/".to_string()]);
            assert!(!config.upload.rollback_on_permission_failure);
            assert_eq!(config.storage.backend, StorageBackend::GoogleDrive);
            assert_eq!(
                config.storage.google_drive.service_account_key_path,
                Some(PathBuf::from("/secrets/sa.json"))
            );
            assert_eq!(config.storage.google_drive.folder_id, "folder-123");
            assert_eq!(config.storage.google_drive.scopes, vec![DRIVE_SCOPE.to_string()]);
            assert_eq!(config.storage.google_drive.request_timeout, Duration::from_secs(60));

            Ok(())
        });
    }

    #[test]
    fn test_port_env() {
        Jail::expect_with(|jail| {
            jail.set_env("PROOF_UPLOAD_STORAGE__BACKEND", "in_memory");
            jail.set_env("PORT", "8080");

            let config = Config::load(&args("missing.yaml"))?;
            assert_eq!(config.port, 8080);

            // Prefixed variables win over the plain ones
            jail.set_env("PROOF_UPLOAD_PORT", "9090");
            let config = Config::load(&args("missing.yaml"))?;
            assert_eq!(config.port, 9090);

            Ok(())
        });
    }

    #[test]
    fn test_yaml_and_env_override() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "test.yaml",
                r#"
host: 127.0.0.1
upload:
  max_file_size: 1024
  allowed_mime_prefixes: ["image/png", "image/jpeg"]
  rollback_on_permission_failure: true
storage:
  google_drive:
    access_token: ya29.token
    folder_id: from-yaml
    request_timeout: 5s
cors:
  allowed_origins: ["https://shop.example.com"]
  allow_credentials: true
"#,
            )?;

            jail.set_env("PROOF_UPLOAD_STORAGE__GOOGLE_DRIVE__FOLDER_ID", "from-env");

            let config = Config::load(&args("test.yaml"))?;

            assert_eq!(config.host, "127.0.0.1");
            assert_eq!(config.upload.max_file_size, 1024);
            assert!(config.upload.is_allowed_mime("image/png"));
            assert!(!config.upload.is_allowed_mime("image/gif"));
            assert!(config.upload.rollback_on_permission_failure);
            assert_eq!(config.storage.google_drive.access_token.as_deref(), Some("ya29.token"));
            assert_eq!(config.storage.google_drive.folder_id, "from-env");
            assert_eq!(config.storage.google_drive.request_timeout, Duration::from_secs(5));
            assert!(config.cors.allow_credentials);
            assert!(matches!(
                &config.cors.allowed_origins[0],
                CorsOrigin::Url(url) if url.as_str() == "https://shop.example.com/"
            ));

            Ok(())
        });
    }

    #[test]
    fn test_example_config_is_valid() {
        Jail::expect_with(|jail| {
            jail.create_file("config.yaml", include_str!("../config.example.yaml"))?;

            let config = Config::load(&args("config.yaml"))?;
            assert_eq!(config.storage.google_drive.folder_id, "1AbCdEfGhIjKlMnOp");
            assert_eq!(config.cors.max_age, Some(3600));

            Ok(())
        });
    }

    #[test]
    fn test_config_path_env_is_not_a_key() {
        Jail::expect_with(|jail| {
            jail.create_file("custom.yaml", "storage:\n  backend: in_memory\n")?;
            jail.set_env("PROOF_UPLOAD_CONFIG", "custom.yaml");

            let config = Config::load(&args("custom.yaml"))?;
            assert_eq!(config.storage.backend, StorageBackend::InMemory);

            Ok(())
        });
    }

    #[test]
    fn test_drive_requires_credentials() {
        Jail::expect_with(|jail| {
            jail.set_env("GOOGLE_DRIVE_FOLDER_ID", "folder-123");

            let err = Config::load(&args("missing.yaml")).unwrap_err();
            assert!(err.to_string().contains("needs credentials"));

            Ok(())
        });
    }

    #[test]
    fn test_drive_rejects_both_credentials() {
        Jail::expect_with(|jail| {
            jail.set_env("GOOGLE_SERVICE_ACCOUNT_KEY_PATH", "/secrets/sa.json");
            jail.set_env("GOOGLE_DRIVE_FOLDER_ID", "folder-123");
            jail.set_env("PROOF_UPLOAD_STORAGE__GOOGLE_DRIVE__ACCESS_TOKEN", "ya29.token");

            let err = Config::load(&args("missing.yaml")).unwrap_err();
            assert!(err.to_string().contains("only one of"));

            Ok(())
        });
    }

    #[test]
    fn test_drive_requires_folder() {
        Jail::expect_with(|jail| {
            jail.set_env("GOOGLE_SERVICE_ACCOUNT_KEY_PATH", "/secrets/sa.json");

            let err = Config::load(&args("missing.yaml")).unwrap_err();
            assert!(err.to_string().contains("destination folder"));

            Ok(())
        });
    }

    #[test]
    fn test_in_memory_backend_needs_no_credentials() {
        Jail::expect_with(|jail| {
            jail.set_env("PROOF_UPLOAD_STORAGE__BACKEND", "in_memory");

            let config = Config::load(&args("missing.yaml"))?;
            assert_eq!(config.storage.backend, StorageBackend::InMemory);

            Ok(())
        });
    }

    #[test]
    fn test_zero_file_size_rejected() {
        let mut config = Config::default();
        config.storage.backend = StorageBackend::InMemory;
        config.upload.max_file_size = 0;

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_mime_prefixes_rejected() {
        let mut config = Config::default();
        config.storage.backend = StorageBackend::InMemory;
        config.upload.allowed_mime_prefixes = vec![];

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_mime_prefix_among_others_rejected() {
        let mut config = Config::default();
        config.storage.backend = StorageBackend::InMemory;
        config.upload.allowed_mime_prefixes = vec!["image/".to_string(), "".to_string()];

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("allowed_mime_prefixes"));

        config.upload.allowed_mime_prefixes = vec!["image/".to_string(), "  ".to_string()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_wildcard_cors_mixed_with_origins_rejected() {
        let mut config = Config::default();
        config.storage.backend = StorageBackend::InMemory;
        config.cors.allowed_origins = vec![
            CorsOrigin::Wildcard,
            CorsOrigin::Url(Url::parse("https://shop.example.com").unwrap()),
        ];

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("cannot be combined"));
    }

    #[test]
    fn test_wildcard_cors_with_credentials_rejected() {
        let mut config = Config::default();
        config.storage.backend = StorageBackend::InMemory;
        config.cors.allow_credentials = true;

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("wildcard"));
    }

    #[test]
    fn test_body_limit_leaves_room_for_fields() {
        let upload = UploadConfig::default();
        assert_eq!(upload.body_limit(), 11 * 1024 * 1024);
    }
}
