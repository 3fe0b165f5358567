use log::{ info, warn, error };
use serde_json::Value as JsonValue;
use std::path::{ Path, PathBuf };

use crate::backend::ApiClient;
use crate::config::{ shared_settings, SettingsHandle };
use crate::error::{ SyncError, SyncResult };
use crate::models::events::{ EventSink, ToastLevel };
use crate::models::settings::{ PartialSettings, Settings };

pub const SETTINGS_SAVED_LOCALLY: &str =
    "Settings saved locally. Could not sync with the server.";

/// Loads settings from the local cache and the backend, and writes them back
/// to both. The local cache wins whenever the backend cannot be reached.
pub struct SettingsManager {
    api: ApiClient,
    cache_path: PathBuf,
    handle: SettingsHandle,
    events: EventSink,
}

impl SettingsManager {
    pub fn new(api: ApiClient, cache_path: impl Into<PathBuf>, events: EventSink) -> Self {
        Self {
            api,
            cache_path: cache_path.into(),
            handle: shared_settings(Settings::default()),
            events,
        }
    }

    pub fn handle(&self) -> SettingsHandle {
        self.handle.clone()
    }

    pub async fn snapshot(&self) -> Settings {
        self.handle.read().await.clone()
    }

    /// Defaults, overlaid by the local cache, overlaid by `GET /settings`.
    pub async fn load(&self) -> Settings {
        let mut settings = Settings::default();

        match read_cache(&self.cache_path).await {
            Ok(Some(partial)) => {
                info!("Loaded cached settings from {}", self.cache_path.display());
                settings = settings.merged(partial);
            }
            Ok(None) => {
                info!("No settings cache at {}, using defaults", self.cache_path.display());
            }
            Err(e) => {
                warn!("Ignoring unreadable settings cache {}: {}", self.cache_path.display(), e);
            }
        }

        match self.api.get_json::<JsonValue>(&["settings"]).await {
            Ok(remote) => {
                match PartialSettings::from_json(remote) {
                    Ok(partial) => {
                        settings = settings.merged(partial);
                        if let Err(e) = write_cache(&self.cache_path, &settings).await {
                            warn!("Failed to refresh settings cache: {}", e);
                        }
                    }
                    Err(e) => warn!("Ignoring malformed remote settings: {}", e),
                }
            }
            Err(e) => {
                warn!("Could not load remote settings, keeping local values: {}", e);
            }
        }

        *self.handle.write().await = settings.clone();
        settings
    }

    /// Local cache first, then `POST /settings`. A failed remote write is
    /// reported as a warning toast and is not an error.
    pub async fn save(&self, settings: Settings) -> SyncResult<()> {
        *self.handle.write().await = settings.clone();

        if let Err(e) = write_cache(&self.cache_path, &settings).await {
            error!("Failed to write settings cache {}: {}", self.cache_path.display(), e);
            self.events.toast(ToastLevel::Error, "Error", "Error saving settings");
            return Err(e);
        }

        match
            self.api.post_json::<JsonValue>(&["settings"], &settings.to_backend_payload()).await
        {
            Ok(_) => {
                info!("Settings saved");
                self.events.toast(ToastLevel::Success, "Success", "Settings saved successfully");
            }
            Err(e) => {
                warn!("Failed to save settings to server: {}", e);
                self.events.toast(ToastLevel::Warning, "Warning", SETTINGS_SAVED_LOCALLY);
            }
        }
        Ok(())
    }

    pub async fn update(&self, partial: PartialSettings) -> SyncResult<Settings> {
        let settings = self.snapshot().await.merged(partial);
        self.save(settings.clone()).await?;
        Ok(settings)
    }

    pub async fn reset(&self) -> SyncResult<Settings> {
        let settings = Settings::default();
        self.save(settings.clone()).await?;
        Ok(settings)
    }
}

async fn read_cache(path: &Path) -> SyncResult<Option<PartialSettings>> {
    match tokio::fs::read_to_string(path).await {
        Ok(text) => {
            let value: JsonValue = serde_json::from_str(&text)?;
            Ok(Some(PartialSettings::from_json(value)?))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(SyncError::from(e)),
    }
}

async fn write_cache(path: &Path, settings: &Settings) -> SyncResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    let json = serde_json::to_string_pretty(settings)?;
    tokio::fs::write(path, json).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::events::SessionEvent;
    use crate::models::settings::{ Theme, DEFAULT_MAX_TOKENS };
    use serde_json::json;
    use tempfile::TempDir;
    use wiremock::matchers::{ method, path };
    use wiremock::{ Mock, MockServer, ResponseTemplate };

    fn unreachable_api() -> ApiClient {
        ApiClient::new("http://127.0.0.1:9").unwrap()
    }

    #[tokio::test]
    async fn remote_partial_merges_over_defaults() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/settings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "temperature": 0.9 })))
            .mount(&server).await;

        let dir = TempDir::new().unwrap();
        let manager = SettingsManager::new(
            ApiClient::new(&server.uri()).unwrap(),
            dir.path().join("settings.json"),
            EventSink::detached()
        );
        let settings = manager.load().await;

        assert_eq!(settings, Settings { temperature: 0.9, ..Settings::default() });
        assert_eq!(manager.snapshot().await, settings);
        assert!(dir.path().join("settings.json").exists());
    }

    #[tokio::test]
    async fn local_cache_stands_when_remote_is_unreachable() {
        let dir = TempDir::new().unwrap();
        let cache = dir.path().join("settings.json");
        std::fs::write(&cache, r#"{"theme":"dark","saveHistory":false}"#).unwrap();

        let manager = SettingsManager::new(unreachable_api(), &cache, EventSink::detached());
        let settings = manager.load().await;

        assert_eq!(settings.theme, Theme::Dark);
        assert!(!settings.save_history);
        assert_eq!(settings.max_tokens, DEFAULT_MAX_TOKENS);
    }

    #[tokio::test]
    async fn corrupt_cache_falls_back_to_defaults() {
        let dir = TempDir::new().unwrap();
        let cache = dir.path().join("settings.json");
        std::fs::write(&cache, "{ not json").unwrap();

        let manager = SettingsManager::new(unreachable_api(), &cache, EventSink::detached());
        assert_eq!(manager.load().await, Settings::default());
    }

    #[tokio::test]
    async fn save_keeps_local_copy_and_warns_when_remote_fails() {
        let dir = TempDir::new().unwrap();
        let cache = dir.path().join("nested").join("settings.json");
        let (events, mut rx) = EventSink::channel();
        let manager = SettingsManager::new(unreachable_api(), &cache, events);

        let wanted = Settings { temperature: 1.5, ..Settings::default() };
        manager.save(wanted.clone()).await.unwrap();

        let cached: JsonValue = serde_json::from_str(&std::fs::read_to_string(&cache).unwrap()).unwrap();
        assert_eq!(cached["temperature"], 1.5);
        assert_eq!(manager.snapshot().await, wanted);
        match rx.try_recv().unwrap() {
            SessionEvent::Toast { level, message, .. } => {
                assert_eq!(level, ToastLevel::Warning);
                assert!(message.starts_with("Settings saved locally."));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn save_posts_backend_names() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/settings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "message": "Settings saved successfully" })))
            .expect(1)
            .mount(&server).await;

        let dir = TempDir::new().unwrap();
        let manager = SettingsManager::new(
            ApiClient::new(&server.uri()).unwrap(),
            dir.path().join("settings.json"),
            EventSink::detached()
        );
        manager.update(PartialSettings { use_documents: Some(true), ..Default::default() }).await.unwrap();

        let requests = server.received_requests().await.unwrap();
        let body: JsonValue = serde_json::from_slice(&requests[0].body).unwrap();
        assert_eq!(body["use_docs_toggle"], true);
        assert_eq!(body["model_max_tokens"], DEFAULT_MAX_TOKENS);
    }
}
