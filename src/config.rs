//! Client configuration for talking to the conversion backend.
//!
//! Everything the gateway needs lives in [`GatewayConfig`], built through
//! [`GatewayConfigBuilder`]. Endpoint paths are fixed by the backend and are
//! not configurable; only where the backend lives and how long we are
//! willing to wait for it are.

use crate::error::ConfigError;
use reqwest::Url;
use std::time::Duration;

/// Default backend address used by the development server.
pub const DEFAULT_BASE_URL: &str = "http://localhost:8000";

/// Key under which the OCR credential is kept in durable client storage.
pub const CREDENTIAL_KEY: &str = "ocr_api_key";

/// Fixed backend endpoint paths.
pub mod endpoints {
    pub const IDENTITY: &str = "/api/user";
    pub const AUTH_BEGIN: &str = "/auth/login";
    pub const AUTH_END: &str = "/auth/logout";
    pub const SUBMIT_PDF: &str = "/api/convert";
    pub const SUBMIT_OCR: &str = "/api/ocr/convert";
    pub const CANCEL: &str = "/api/cancel";
    pub const PROGRESS: &str = "/api/progress";
    pub const DOWNLOAD: &str = "/api/download";
}

/// Configuration for [`crate::gateway::HttpGateway`].
///
/// # Example
/// ```rust
/// use drive2ebook::GatewayConfig;
///
/// let config = GatewayConfig::builder()
///     .base_url("http://127.0.0.1:8000")
///     .submit_timeout_secs(300)
///     .build()
///     .unwrap();
/// assert_eq!(config.download_url(), "http://127.0.0.1:8000/api/download");
/// ```
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Root of the backend, without trailing slash. Endpoint paths are joined onto it.
    pub base_url: String,

    /// Ceiling for a submission call in seconds. Default: 600.
    ///
    /// OCR jobs over large folders routinely run for several minutes and the
    /// backend only answers once the artifact is written. This is also the
    /// hard ceiling on how long a cancelled job may take to settle.
    pub submit_timeout_secs: u64,

    /// Timeout for the short calls (identity, auth, cancel, download). Default: 30.
    pub request_timeout_secs: u64,

    /// TCP connect timeout applied to every call, the progress stream included. Default: 10.
    pub connect_timeout_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            submit_timeout_secs: 600,
            request_timeout_secs: 30,
            connect_timeout_secs: 10,
        }
    }
}

impl GatewayConfig {
    pub fn builder() -> GatewayConfigBuilder {
        GatewayConfigBuilder {
            base_url: None,
            config: Self::default(),
        }
    }

    /// Absolute URL of a backend endpoint path.
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}{path}", self.base_url.trim_end_matches('/'))
    }

    /// Locator of the result artifact once a job has completed.
    pub fn download_url(&self) -> String {
        self.endpoint(endpoints::DOWNLOAD)
    }

    pub fn submit_timeout(&self) -> Duration {
        Duration::from_secs(self.submit_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// Builder for [`GatewayConfig`].
#[derive(Debug)]
pub struct GatewayConfigBuilder {
    base_url: Option<String>,
    config: GatewayConfig,
}

impl GatewayConfigBuilder {
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn submit_timeout_secs(mut self, secs: u64) -> Self {
        self.config.submit_timeout_secs = secs;
        self
    }

    pub fn request_timeout_secs(mut self, secs: u64) -> Self {
        self.config.request_timeout_secs = secs;
        self
    }

    pub fn connect_timeout_secs(mut self, secs: u64) -> Self {
        self.config.connect_timeout_secs = secs;
        self
    }

    /// Build the configuration, validating the URL and timeouts.
    pub fn build(mut self) -> Result<GatewayConfig, ConfigError> {
        if let Some(raw) = self.base_url.take() {
            let url = Url::parse(raw.trim())
                .map_err(|e| ConfigError::Invalid(format!("base URL '{raw}': {e}")))?;
            if url.scheme() != "http" && url.scheme() != "https" {
                return Err(ConfigError::Invalid(format!(
                    "base URL must be http or https, got '{}'",
                    url.scheme()
                )));
            }
            self.config.base_url = url.as_str().trim_end_matches('/').to_string();
        }

        let c = &self.config;
        if c.submit_timeout_secs == 0 || c.request_timeout_secs == 0 || c.connect_timeout_secs == 0
        {
            return Err(ConfigError::Invalid("timeouts must be ≥ 1 second".into()));
        }
        Ok(self.config)
    }
}
