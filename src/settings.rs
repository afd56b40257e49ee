use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;

use crate::selectors::SelectorSet;
use crate::session::Wait;

const DEFAULT_START_URL_FILE: &str = "local/starting_link.txt";
const OUTPUT_DIR: &str = "outputs";

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Saved-list URL to open. Falls back to `start_url_file`, then the selector set.
    #[serde(default)]
    pub start_url: Option<String>,
    pub start_url_file: PathBuf,
    /// Output store; defaults to `outputs/places_<timestamp>.json`.
    #[serde(default)]
    pub output: Option<PathBuf>,
    /// Built-in selector set name or path to a selector file.
    pub selectors: String,
    /// Page loads, pre-list clicks and the list container.
    pub wait: Wait,
    /// Detail view rendering after a place is opened.
    pub detail_wait: Wait,
    /// Expandable sections (opening hours).
    pub expand_wait: Wait,
    pub retry: RetrySettings,
    pub browser: BrowserSettings,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct RetrySettings {
    /// Attempts per place when no contact field was extracted.
    pub max_attempts: u32,
    pub delay_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BrowserSettings {
    pub headless: bool,
    #[serde(default)]
    pub user_data_dir: Option<PathBuf>,
    #[serde(default)]
    pub chrome_executable: Option<PathBuf>,
    pub window_width: u32,
    pub window_height: u32,
}

/// Defaults, then `places.toml` (or `file`), then `PLACES_*` environment
/// variables (`PLACES_WAIT__TIMEOUT_MS=30000`).
pub fn load(file: Option<&Path>) -> Result<Settings> {
    load_with_env(file, environment())
}

fn environment() -> Environment {
    Environment::with_prefix("PLACES")
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}

fn load_with_env(file: Option<&Path>, env: Environment) -> Result<Settings> {
    let builder = Config::builder()
        .set_default("start_url_file", DEFAULT_START_URL_FILE)?
        .set_default("selectors", "favorites-list")?
        .set_default("wait.timeout_ms", 20_000)?
        .set_default("wait.interval_ms", 500)?
        .set_default("detail_wait.timeout_ms", 10_000)?
        .set_default("detail_wait.interval_ms", 250)?
        .set_default("expand_wait.timeout_ms", 3_000)?
        .set_default("expand_wait.interval_ms", 200)?
        .set_default("retry.max_attempts", 3)?
        .set_default("retry.delay_ms", 1_000)?
        .set_default("browser.headless", false)?
        .set_default("browser.window_width", 1280)?
        .set_default("browser.window_height", 900)?;

    let builder = match file {
        Some(path) => builder.add_source(File::from(path)),
        None => builder.add_source(File::with_name("places").required(false)),
    };

    let settings: Settings = builder
        .add_source(env)
        .build()
        .and_then(|c| c.try_deserialize())
        .context("Failed to load settings")?;

    if settings.retry.max_attempts == 0 {
        bail!("retry.max_attempts must be at least 1");
    }
    Ok(settings)
}

impl Settings {
    /// Explicit URL, else the first line of `start_url_file`, else the
    /// selector set's own entry page.
    pub fn start_url(&self, selectors: &SelectorSet) -> Result<String> {
        if let Some(url) = self.start_url.as_deref().map(str::trim).filter(|u| !u.is_empty()) {
            return Ok(url.to_string());
        }
        if self.start_url_file.exists() {
            let text = std::fs::read_to_string(&self.start_url_file).with_context(|| {
                format!("Failed to read {}", self.start_url_file.display())
            })?;
            if let Some(url) = text.lines().map(str::trim).find(|l| !l.is_empty()) {
                return Ok(url.to_string());
            }
        }
        if let Some(url) = &selectors.start_url {
            return Ok(url.clone());
        }
        bail!(
            "no start URL: pass --url, set PLACES_START_URL, or put the list link in {}",
            self.start_url_file.display()
        )
    }

    pub fn output_path(&self) -> PathBuf {
        self.output.clone().unwrap_or_else(|| {
            let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
            Path::new(OUTPUT_DIR).join(format!("places_{}.json", stamp))
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn defaults_apply_without_a_file() {
        let s = load(None).unwrap();
        assert_eq!(s.selectors, "favorites-list");
        assert_eq!(s.wait, Wait::new(20_000, 500));
        assert_eq!(s.detail_wait.interval_ms, 250);
        assert_eq!(s.browser.window_width, 1280);
        assert!(s.start_url.is_none());
        assert!(s.output_path().starts_with(OUTPUT_DIR));
    }

    #[test]
    fn file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(
            &path,
            "start_url = \"https://maps.example/list/1\"\nselectors = \"saved-menu\"\n\n\
             [detail_wait]\ntimeout_ms = 4000\ninterval_ms = 100\n\n[browser]\nheadless = true\n",
        )
        .unwrap();
        let s = load(Some(&path)).unwrap();
        assert_eq!(s.detail_wait, Wait::new(4_000, 100));
        assert!(s.browser.headless);
        let set = SelectorSet::builtin(&s.selectors).unwrap();
        assert_eq!(s.start_url(&set).unwrap(), "https://maps.example/list/1");
    }

    #[test]
    fn environment_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("places.toml");
        std::fs::write(&path, "[expand_wait]\ntimeout_ms = 4000\ninterval_ms = 100\n").unwrap();

        let vars = HashMap::from([
            ("PLACES_EXPAND_WAIT__TIMEOUT_MS".to_string(), "750".to_string()),
            ("PLACES_BROWSER__HEADLESS".to_string(), "true".to_string()),
        ]);
        let s = load_with_env(Some(&path), environment().source(Some(vars))).unwrap();
        assert_eq!(s.expand_wait, Wait::new(750, 100));
        assert!(s.browser.headless);
    }

    #[test]
    fn zero_attempts_is_rejected() {
        let vars = HashMap::from([("PLACES_RETRY__MAX_ATTEMPTS".to_string(), "0".to_string())]);
        let err = load_with_env(None, environment().source(Some(vars))).unwrap_err();
        assert!(err.to_string().contains("max_attempts"));
    }

    #[test]
    fn start_url_falls_back_to_link_file_then_selector_set() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = load(None).unwrap();
        s.start_url = None;
        s.start_url_file = dir.path().join("starting_link.txt");

        let menu = SelectorSet::builtin("saved-menu").unwrap();
        assert_eq!(s.start_url(&menu).unwrap(), "https://www.google.com/maps");

        let list = SelectorSet::builtin("favorites-list").unwrap();
        assert!(s.start_url(&list).is_err());

        std::fs::write(&s.start_url_file, "\n  https://maps.example/l/abc  \n").unwrap();
        assert_eq!(s.start_url(&list).unwrap(), "https://maps.example/l/abc");
    }
}
