use std::io::IsTerminal;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::error::{Result, SyncError};
use crate::session::Credentials;

pub const ENV_BASE_URL: &str = "VENDORS_BASE_URL";
pub const ENV_LOGIN: &str = "VENDORS_LOGIN";
pub const ENV_PASSWORD: &str = "VENDORS_PASSWORD";
pub const ENV_STORE: &str = "VENDORSYNC_STORE";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_store_path")]
    pub store_path: String,
    #[serde(default)]
    pub login: String,
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

fn default_base_url() -> String {
    "https://vendors.bitrix24.ru".to_string()
}

fn default_store_path() -> String {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("Documents")
        .join("vendorsync")
        .join("vendorsync.db")
        .to_string_lossy()
        .to_string()
}

fn default_max_pages() -> usize {
    crate::scraper::DEFAULT_MAX_PAGES
}

fn default_chunk_size() -> usize {
    100
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            store_path: default_store_path(),
            login: String::new(),
            max_pages: default_max_pages(),
            chunk_size: default_chunk_size(),
        }
    }
}

impl Settings {
    /// Environment values win over the settings file.
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| var(key).filter(|v| !v.trim().is_empty());
        if let Some(v) = non_empty(ENV_BASE_URL) {
            self.base_url = v;
        }
        if let Some(v) = non_empty(ENV_LOGIN) {
            self.login = v;
        }
        if let Some(v) = non_empty(ENV_STORE) {
            self.store_path = shellexpand_path(&v);
        }
    }

    pub fn store_path(&self) -> PathBuf {
        PathBuf::from(&self.store_path)
    }

    /// Login from settings; password from `VENDORS_PASSWORD`, else prompted
    /// when a terminal is attached.
    pub fn credentials(&self) -> Result<Credentials> {
        if self.login.is_empty() {
            return Err(SyncError::Settings(format!(
                "no portal login configured; set {ENV_LOGIN} or run `vendorsync init --login <LOGIN>`"
            )));
        }
        let password = match std::env::var(ENV_PASSWORD) {
            Ok(p) if !p.is_empty() => Zeroizing::new(p),
            _ if std::io::stdin().is_terminal() => {
                Zeroizing::new(rpassword::prompt_password(format!("Password for {}: ", self.login))?)
            }
            _ => {
                return Err(SyncError::Settings(format!(
                    "no portal password; set {ENV_PASSWORD}"
                )))
            }
        };
        Ok(Credentials {
            login: self.login.clone(),
            password,
        })
    }
}

fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("vendorsync")
}

fn settings_path(dir: &Path) -> PathBuf {
    dir.join("settings.json")
}

pub fn load_settings() -> Settings {
    let mut settings = load_settings_from(&config_dir());
    settings.apply_env(|k| std::env::var(k).ok());
    settings
}

/// File values merged over defaults. A missing or unreadable file yields defaults.
fn load_settings_from(dir: &Path) -> Settings {
    let path = settings_path(dir);
    if !path.exists() {
        return Settings::default();
    }
    let content = std::fs::read_to_string(&path).unwrap_or_default();
    serde_json::from_str(&content).unwrap_or_default()
}

pub fn save_settings(settings: &Settings) -> Result<()> {
    save_settings_to(&config_dir(), settings)
}

fn save_settings_to(dir: &Path, settings: &Settings) -> Result<()> {
    std::fs::create_dir_all(dir)?;
    let json = serde_json::to_string_pretty(settings)
        .map_err(|e| SyncError::Settings(e.to_string()))?;
    std::fs::write(settings_path(dir), format!("{json}\n"))?;
    Ok(())
}

pub fn shellexpand_path(path: &str) -> String {
    if path.starts_with('~') {
        if let Some(home) = dirs::home_dir() {
            return path.replacen('~', &home.to_string_lossy(), 1);
        }
    }
    path.to_string()
}
