use std::path::PathBuf;
use std::time::Duration;

/// Application-level constants
pub const APP_NAME: &str = "endorsement-pipeline";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Fallback API base url used when an insurer config carries none.
pub const DEFAULT_API_BASE_URL: &str = "https://api.example.com";

/// Routing threshold used when an insurer config carries none.
pub const DEFAULT_MIN_CONFIDENCE: f64 = 0.80;

/// Default Gemini model for document extraction.
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.5-flash";

/// Default tracing filter when `RUST_LOG` is not set.
pub fn default_log_filter() -> &'static str {
    "endorsement_pipeline=info,warn"
}

/// Root directory for pipeline working data.
/// `<cache dir>/endorsement-pipeline/`, or the system temp dir when no cache dir exists.
pub fn app_data_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(APP_NAME)
}

/// Staging directory for downloaded batch files.
pub fn staging_dir() -> PathBuf {
    app_data_dir().join("staging")
}

/// Directory the JSON record sink writes persisted batches to.
pub fn output_dir() -> PathBuf {
    app_data_dir().join("output")
}

// ═══════════════════════════════════════════════════════════
// Runtime settings
// ═══════════════════════════════════════════════════════════

/// Runtime settings read from `ENDORSE_*` environment variables.
///
/// Every value has a default so a local run needs no environment at all;
/// only the Gemini key is required for LLM-backed extraction.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Where downloaded files are staged (`ENDORSE_STAGING_DIR`).
    pub staging_dir: PathBuf,
    /// Root that storage locators resolve against (`ENDORSE_STORAGE_ROOT`).
    pub storage_root: PathBuf,
    /// Where persisted batches are written (`ENDORSE_OUTPUT_DIR`).
    pub output_dir: PathBuf,
    /// `ENDORSE_GEMINI_API_KEY` (falls back to `GOOGLE_API_KEY`).
    pub gemini_api_key: String,
    /// `ENDORSE_GEMINI_MODEL`
    pub gemini_model: String,
    /// `ENDORSE_LLM_TEMPERATURE`
    pub llm_temperature: f32,
    /// `ENDORSE_LLM_MAX_TOKENS`
    pub llm_max_tokens: u32,
    /// `ENDORSE_API_BASE_URL`
    pub api_base_url: String,
    /// `ENDORSE_HTTP_TIMEOUT_SECS`
    pub http_timeout: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            staging_dir: staging_dir(),
            storage_root: PathBuf::from("."),
            output_dir: output_dir(),
            gemini_api_key: String::new(),
            gemini_model: DEFAULT_GEMINI_MODEL.to_string(),
            llm_temperature: 0.0,
            llm_max_tokens: 4096,
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            http_timeout: Duration::from_secs(30),
        }
    }
}

impl Settings {
    /// Load settings from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load settings from an arbitrary key lookup (testable without touching the environment).
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Self {
            staging_dir: get("ENDORSE_STAGING_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.staging_dir),
            storage_root: get("ENDORSE_STORAGE_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.storage_root),
            output_dir: get("ENDORSE_OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.output_dir),
            gemini_api_key: get("ENDORSE_GEMINI_API_KEY")
                .or_else(|| get("GOOGLE_API_KEY"))
                .unwrap_or_default(),
            gemini_model: get("ENDORSE_GEMINI_MODEL").unwrap_or(defaults.gemini_model),
            llm_temperature: parse_or(get("ENDORSE_LLM_TEMPERATURE"), defaults.llm_temperature),
            llm_max_tokens: parse_or(get("ENDORSE_LLM_MAX_TOKENS"), defaults.llm_max_tokens),
            api_base_url: get("ENDORSE_API_BASE_URL").unwrap_or(defaults.api_base_url),
            http_timeout: Duration::from_secs(parse_or(
                get("ENDORSE_HTTP_TIMEOUT_SECS"),
                defaults.http_timeout.as_secs(),
            )),
        }
    }
}

fn parse_or<T: std::str::FromStr>(value: Option<String>, default: T) -> T {
    match value {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(value = %raw, "Unparsable setting, using default");
            default
        }),
        None => default,
    }
}
