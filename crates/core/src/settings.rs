use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Array comparison strategy of the differencer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DiffMode {
    #[default]
    Simple,
    Complex,
}

impl FromStr for DiffMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "simple" => Ok(DiffMode::Simple),
            "complex" => Ok(DiffMode::Complex),
            other => Err(format!("unknown diff mode {}", other)),
        }
    }
}

/// Runtime knobs, read from `KEEL_*` environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub poll_initial: Duration,
    pub poll_factor: f64,
    pub poll_max: Duration,
    pub poll_attempts: u32,
    pub save_diffs: bool,
    pub diff_dir: PathBuf,
    /// `major.minor`; detected from the API server when unset.
    pub platform_version: Option<String>,
    pub diff_mode: DiffMode,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            poll_initial: Duration::from_millis(500),
            poll_factor: 1.5,
            poll_max: Duration::from_millis(5000),
            poll_attempts: 65,
            save_diffs: false,
            diff_dir: PathBuf::from("./diff"),
            platform_version: None,
            diff_mode: DiffMode::Simple,
        }
    }
}

fn env<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

impl Settings {
    pub fn from_env() -> Self {
        let d = Settings::default();
        let save_diffs = std::env::var("KEEL_SAVE_DIFFS")
            .map(|v| matches!(v.as_str(), "1" | "true" | "yes"))
            .unwrap_or(d.save_diffs);
        Self {
            poll_initial: env::<u64>("KEEL_POLL_INITIAL_MS").map(Duration::from_millis).unwrap_or(d.poll_initial),
            poll_factor: env::<f64>("KEEL_POLL_FACTOR").filter(|f| *f >= 1.0).unwrap_or(d.poll_factor),
            poll_max: env::<u64>("KEEL_POLL_MAX_MS").map(Duration::from_millis).unwrap_or(d.poll_max),
            poll_attempts: env::<u32>("KEEL_POLL_ATTEMPTS").filter(|n| *n > 0).unwrap_or(d.poll_attempts),
            save_diffs,
            diff_dir: std::env::var("KEEL_DIFF_DIR").map(PathBuf::from).unwrap_or(d.diff_dir),
            platform_version: std::env::var("KEEL_PLATFORM_VERSION").ok().filter(|s| !s.is_empty()),
            diff_mode: env::<DiffMode>("KEEL_DIFF_MODE").unwrap_or(d.diff_mode),
        }
    }

    /// Millisecond backoff for tests.
    pub fn fast() -> Self {
        Self {
            poll_initial: Duration::from_millis(1),
            poll_factor: 1.0,
            poll_max: Duration::from_millis(1),
            poll_attempts: 10,
            ..Self::default()
        }
    }
}
