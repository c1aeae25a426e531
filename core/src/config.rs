use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::info;

#[derive(Debug, Clone)]
pub struct Settings {
    pub addr: SocketAddr,
    pub uploads_dir: PathBuf,
    pub outputs_dir: PathBuf,
    pub downloads_dir: PathBuf,
    pub avatars_dir: PathBuf,
    pub max_upload_bytes: usize,
    pub download_ttl: Duration,
    pub activity_capacity: usize,

    pub openai_api_key: Option<String>,
    pub openai_model: String,
    pub openai_base_url: String,
    pub brave_api_key: Option<String>,
    pub brave_search_url: String,
    pub piston_url: String,
    pub aspose_client_id: Option<String>,
    pub aspose_client_secret: Option<String>,
    pub aspose_base_url: String,
    pub voice_service_url: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([0, 0, 0, 0], 3000)),
            uploads_dir: PathBuf::from("uploads"),
            outputs_dir: PathBuf::from("outputs"),
            downloads_dir: PathBuf::from(".temp-downloads"),
            avatars_dir: PathBuf::from("public/avatars"),
            max_upload_bytes: 10 * 1024 * 1024,
            download_ttl: Duration::from_secs(30 * 60),
            activity_capacity: 200,
            openai_api_key: None,
            openai_model: "gpt-4o".to_string(),
            openai_base_url: "https://api.openai.com/v1".to_string(),
            brave_api_key: None,
            brave_search_url: "https://api.search.brave.com/res/v1/web/search".to_string(),
            piston_url: "https://emkc.org/api/v2/piston/execute".to_string(),
            aspose_client_id: None,
            aspose_client_secret: None,
            aspose_base_url: "https://api.aspose.cloud".to_string(),
            voice_service_url: "http://localhost:8001".to_string(),
        }
    }
}

fn var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parsed<T>(key: &str, fallback: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match var(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{key} has an invalid value: {raw}")),
        None => Ok(fallback),
    }
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        let defaults = Self::default();

        let settings = Self {
            addr: parsed("WORKBENCH_ADDR", defaults.addr)?,
            uploads_dir: var("WORKBENCH_UPLOADS_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.uploads_dir),
            outputs_dir: var("WORKBENCH_OUTPUTS_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.outputs_dir),
            downloads_dir: var("WORKBENCH_DOWNLOADS_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.downloads_dir),
            avatars_dir: var("WORKBENCH_AVATARS_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.avatars_dir),
            max_upload_bytes: parsed("WORKBENCH_MAX_UPLOAD_BYTES", defaults.max_upload_bytes)?,
            download_ttl: Duration::from_secs(parsed(
                "WORKBENCH_DOWNLOAD_TTL_SECS",
                defaults.download_ttl.as_secs(),
            )?),
            activity_capacity: parsed("WORKBENCH_ACTIVITY_CAPACITY", defaults.activity_capacity)?,
            openai_api_key: var("OPENAI_API_KEY"),
            openai_model: var("OPENAI_MODEL").unwrap_or(defaults.openai_model),
            openai_base_url: var("OPENAI_BASE_URL").unwrap_or(defaults.openai_base_url),
            brave_api_key: var("BRAVE_API_KEY"),
            brave_search_url: var("BRAVE_SEARCH_URL").unwrap_or(defaults.brave_search_url),
            piston_url: var("PISTON_URL").unwrap_or(defaults.piston_url),
            aspose_client_id: var("ASPOSE_CLIENT_ID"),
            aspose_client_secret: var("ASPOSE_CLIENT_SECRET"),
            aspose_base_url: var("ASPOSE_BASE_URL").unwrap_or(defaults.aspose_base_url),
            voice_service_url: var("VOICE_SERVICE_URL").unwrap_or(defaults.voice_service_url),
        };

        // Presence only; key values never reach the logs.
        info!(
            openai = settings.openai_api_key.is_some(),
            brave = settings.brave_api_key.is_some(),
            aspose = settings.aspose_credentials().is_some(),
            "Provider credentials detected"
        );
        Ok(settings)
    }

    pub fn rooted_at(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            uploads_dir: root.join("uploads"),
            outputs_dir: root.join("outputs"),
            downloads_dir: root.join("downloads"),
            avatars_dir: root.join("avatars"),
            ..Self::default()
        }
    }

    pub fn aspose_credentials(&self) -> Option<(&str, &str)> {
        match (&self.aspose_client_id, &self.aspose_client_secret) {
            (Some(id), Some(secret)) => Some((id.as_str(), secret.as_str())),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rooted_settings_stay_inside_root() {
        let settings = Settings::rooted_at("/tmp/wb");
        assert!(settings.uploads_dir.starts_with("/tmp/wb"));
        assert!(settings.downloads_dir.starts_with("/tmp/wb"));
        assert_eq!(settings.addr.port(), 0);
        assert_eq!(settings.openai_model, "gpt-4o");
    }

    #[test]
    fn aspose_needs_both_halves() {
        let mut settings = Settings::default();
        settings.aspose_client_id = Some("id".into());
        assert!(settings.aspose_credentials().is_none());
        settings.aspose_client_secret = Some("secret".into());
        assert_eq!(settings.aspose_credentials(), Some(("id", "secret")));
    }
}
