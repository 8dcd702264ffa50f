use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use figment::{
    Figment,
    providers::{Env, Format, Json, Serialized},
};
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};
use vyoma_chat::{DEFAULT_SAVE_WINDOW, Persona};
use vyoma_gateway::DEFAULT_BIND;
use vyoma_llm::{
    DEFAULT_FUNCTION_ENDPOINT, DEFAULT_GEMINI_BASE_URL, DEFAULT_TEXT_MODEL, DEFAULT_VISION_MODEL,
    FunctionClientConfig, GeminiConfig, GeminiModels, ServiceConfig,
};
use vyoma_storage::StoreBackend;

pub const SETTINGS_DIRECTORY_NAME: &str = "vyoma";
pub const SETTINGS_FILE_NAME: &str = "settings.json";
pub const ENV_PREFIX: &str = "VYOMA_";
pub const GEMINI_KEY_ENV: &str = "GEMINI_API_KEY";

const JSON_STORE_FILE_NAME: &str = "chat-store.json";
const SQLITE_STORE_FILE_NAME: &str = "chat.sqlite";

/// How the chat client reaches the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    /// Through a running chat function (`vyoma serve` or a deployed one).
    #[default]
    Function,
    /// Straight to Gemini with the local key.
    Direct,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatSettings {
    pub transport: Transport,
    pub function_endpoint: String,
    /// Anon key forwarded to the chat function, if it needs one.
    pub function_api_key: String,
    pub gemini_api_key: String,
    pub gemini_base_url: String,
    pub text_model: String,
    pub vision_model: String,
    pub persona: Persona,
    pub store: StoreBackend,
    /// Empty means the per-user data directory.
    pub store_path: String,
    pub save_window_ms: u64,
    pub request_timeout_secs: Option<u64>,
    pub bind: String,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            transport: Transport::default(),
            function_endpoint: DEFAULT_FUNCTION_ENDPOINT.to_string(),
            function_api_key: String::new(),
            gemini_api_key: String::new(),
            gemini_base_url: DEFAULT_GEMINI_BASE_URL.to_string(),
            text_model: DEFAULT_TEXT_MODEL.to_string(),
            vision_model: DEFAULT_VISION_MODEL.to_string(),
            persona: Persona::default(),
            store: StoreBackend::default(),
            store_path: String::new(),
            save_window_ms: u64::try_from(DEFAULT_SAVE_WINDOW.as_millis()).unwrap_or(1000),
            request_timeout_secs: None,
            bind: DEFAULT_BIND.to_string(),
        }
    }
}

impl ChatSettings {
    pub fn normalized(mut self) -> Self {
        let defaults = Self::default();
        let or_default = |value: String, fallback: String| {
            let value = value.trim().to_string();
            if value.is_empty() { fallback } else { value }
        };

        self.function_endpoint = or_default(self.function_endpoint, defaults.function_endpoint);
        self.function_api_key = self.function_api_key.trim().to_string();
        self.gemini_api_key = self.gemini_api_key.trim().to_string();
        self.gemini_base_url = or_default(self.gemini_base_url, defaults.gemini_base_url);
        self.text_model = or_default(self.text_model, defaults.text_model);
        self.vision_model = or_default(self.vision_model, defaults.vision_model);
        self.store_path = self.store_path.trim().to_string();
        self.bind = or_default(self.bind, defaults.bind);
        self
    }

    pub fn save_window(&self) -> Duration {
        Duration::from_millis(self.save_window_ms)
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }

    pub fn bind_addr(&self) -> Result<SocketAddr, SettingsError> {
        self.bind.parse().context(InvalidBindSnafu {
            stage: "parse-bind-address",
            raw: self.bind.clone(),
        })
    }

    pub fn gemini_config(&self) -> GeminiConfig {
        let mut config = GeminiConfig::new(&self.gemini_api_key)
            .with_base_url(&self.gemini_base_url)
            .with_models(GeminiModels::new(&self.text_model, &self.vision_model));
        if let Some(timeout) = self.request_timeout() {
            config = config.with_timeout(timeout);
        }
        config
    }

    pub fn service_config(&self) -> ServiceConfig {
        match self.transport {
            Transport::Direct => ServiceConfig::Direct(self.gemini_config()),
            Transport::Function => {
                let mut config = FunctionClientConfig::new(&self.function_endpoint)
                    .with_api_key(&self.function_api_key);
                if let Some(timeout) = self.request_timeout() {
                    config = config.with_timeout(timeout);
                }
                ServiceConfig::Function(config)
            }
        }
    }

    /// Store location for the configured backend; unused for `memory`.
    pub fn store_location(&self) -> String {
        if !self.store_path.is_empty() {
            return self.store_path.clone();
        }

        let file_name = match self.store {
            StoreBackend::Sqlite => SQLITE_STORE_FILE_NAME,
            StoreBackend::Json | StoreBackend::Memory => JSON_STORE_FILE_NAME,
        };
        default_data_dir().join(file_name).display().to_string()
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|path| path.join(SETTINGS_DIRECTORY_NAME))
        .unwrap_or_else(|| PathBuf::from(".vyoma"))
}

/// Defaults and the settings file, without the environment.
pub fn file_figment(path: &Path) -> Figment {
    Figment::from(Serialized::defaults(ChatSettings::default())).merge(Json::file(path))
}

/// Layered sources, lowest priority first: defaults, settings file,
/// `GEMINI_API_KEY`, then `VYOMA_*` variables.
pub fn figment(path: &Path) -> Figment {
    file_figment(path)
        .merge(
            Env::raw()
                .only(&[GEMINI_KEY_ENV])
                .map(|_| "gemini_api_key".into()),
        )
        .merge(Env::prefixed(ENV_PREFIX))
}

pub struct SettingsStore {
    settings: Arc<ArcSwap<ChatSettings>>,
    config_path: PathBuf,
}

impl SettingsStore {
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|path| path.join(SETTINGS_DIRECTORY_NAME))
            .unwrap_or_else(|| PathBuf::from(".vyoma"))
    }

    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join(SETTINGS_FILE_NAME)
    }

    pub fn new(config_path: PathBuf) -> Self {
        let settings = Self::extract(figment(&config_path), &config_path);
        Self::with_settings(settings, config_path)
    }

    pub fn with_settings(settings: ChatSettings, config_path: PathBuf) -> Self {
        Self {
            settings: Arc::new(ArcSwap::from_pointee(settings)),
            config_path,
        }
    }

    pub fn load() -> Self {
        Self::new(Self::default_config_path())
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn settings(&self) -> Arc<ChatSettings> {
        self.settings.load_full()
    }

    /// Applies `change` to what the settings file holds and saves it. Values
    /// that only come from the environment stay out of the file; the effective
    /// settings are then reloaded with every layer.
    pub fn update<F>(&self, change: F) -> Result<(), SettingsError>
    where
        F: FnOnce(&mut ChatSettings),
    {
        let mut file_settings = Self::extract(file_figment(&self.config_path), &self.config_path);
        change(&mut file_settings);
        let file_settings = file_settings.normalized();
        self.persist(&file_settings)?;

        let effective = Self::extract(figment(&self.config_path), &self.config_path);
        self.settings.store(Arc::new(effective));
        Ok(())
    }

    fn extract(figment: Figment, path: &Path) -> ChatSettings {
        if !path.exists() {
            tracing::info!(path = %path.display(), "settings file not found, using defaults");
        }

        match figment.extract::<ChatSettings>() {
            Ok(settings) => settings.normalized(),
            Err(error) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %error,
                    "failed to parse settings, using defaults"
                );
                ChatSettings::default()
            }
        }
    }

    fn persist(&self, settings: &ChatSettings) -> Result<(), SettingsError> {
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent).context(CreateDirSnafu {
                stage: "create-settings-directory",
                path: parent.to_path_buf(),
            })?;
        }

        let content = serde_json::to_string_pretty(settings).context(SerializeConfigSnafu {
            stage: "serialize-settings-json",
        })?;

        let temp_path = self.config_path.with_extension("json.tmp");
        std::fs::write(&temp_path, content).context(WriteFileSnafu {
            stage: "write-temporary-settings-file",
            path: temp_path.clone(),
        })?;

        std::fs::rename(&temp_path, &self.config_path).context(RenameTempFileSnafu {
            stage: "rename-temporary-settings-file",
            from: temp_path,
            to: self.config_path.clone(),
        })?;

        tracing::info!(path = %self.config_path.display(), "saved settings");
        Ok(())
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SettingsError {
    #[snafu(display("failed to create settings directory at {path:?} on `{stage}`: {source}"))]
    CreateDir {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("failed to serialize settings on `{stage}`: {source}"))]
    SerializeConfig {
        stage: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("failed to write settings file at {path:?} on `{stage}`: {source}"))]
    WriteFile {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display(
        "failed to replace settings file from {from:?} to {to:?} on `{stage}`: {source}"
    ))]
    RenameTempFile {
        stage: &'static str,
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("invalid bind address '{raw}' on `{stage}`: {source}"))]
    InvalidBind {
        stage: &'static str,
        raw: String,
        source: std::net::AddrParseError,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_settings_path() -> PathBuf {
        std::env::temp_dir()
            .join(format!("vyoma-settings-{}", uuid::Uuid::now_v7()))
            .join(SETTINGS_FILE_NAME)
    }

    fn file_only(path: &Path) -> ChatSettings {
        SettingsStore::extract(file_figment(path), path)
    }

    #[test]
    fn missing_file_yields_defaults() {
        let path = temp_settings_path();
        let settings = file_only(&path);

        assert_eq!(settings, ChatSettings::default());
        assert_eq!(settings.save_window(), Duration::from_millis(1000));
        assert!(matches!(settings.service_config(), ServiceConfig::Function(_)));
    }

    #[test]
    fn file_values_override_defaults_and_blank_fields_recover() {
        let path = temp_settings_path();
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(
            &path,
            r#"{"transport":"direct","gemini_api_key":" key ","persona":"sarcastic","text_model":"  ","store":"sqlite","save_window_ms":250}"#,
        )
        .unwrap();

        let settings = file_only(&path);

        assert_eq!(settings.transport, Transport::Direct);
        assert_eq!(settings.gemini_api_key, "key");
        assert_eq!(settings.persona, Persona::Sarcastic);
        assert_eq!(settings.text_model, DEFAULT_TEXT_MODEL);
        assert_eq!(settings.store, StoreBackend::Sqlite);
        assert!(settings.store_location().ends_with(SQLITE_STORE_FILE_NAME));
        assert_eq!(settings.save_window(), Duration::from_millis(250));
        match settings.service_config() {
            ServiceConfig::Direct(config) => assert_eq!(config.api_key, "key"),
            other => panic!("expected direct transport, got {other:?}"),
        }
    }

    #[test]
    fn unknown_persona_in_file_falls_back_to_defaults() {
        let path = temp_settings_path();
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, r#"{"persona":"pirate","bind":"0.0.0.0:9000"}"#).unwrap();

        assert_eq!(file_only(&path), ChatSettings::default());
    }

    #[test]
    fn update_persists_through_temp_file() {
        let path = temp_settings_path();
        let store = SettingsStore::with_settings(ChatSettings::default(), path.clone());

        store
            .update(|settings| {
                settings.persona = Persona::Motivational;
                settings.bind = "127.0.0.1:9999".to_string();
            })
            .unwrap();

        assert_eq!(store.settings().persona, Persona::Motivational);
        assert!(!path.with_extension("json.tmp").exists());
        let reloaded = file_only(&path);
        assert_eq!(reloaded.persona, Persona::Motivational);
        assert_eq!(reloaded.bind_addr().unwrap().port(), 9999);
    }

    #[test]
    fn update_keeps_environment_values_out_of_the_file() {
        figment::Jail::expect_with(|jail| {
            jail.set_env(GEMINI_KEY_ENV, "env-only-secret");
            jail.set_env("VYOMA_BIND", "0.0.0.0:9100");
            let path = jail.directory().join(SETTINGS_FILE_NAME);
            jail.create_file(SETTINGS_FILE_NAME, r#"{"text_model":"file-model"}"#)?;

            let store = SettingsStore::new(path.clone());
            assert_eq!(store.settings().gemini_api_key, "env-only-secret");

            store
                .update(|settings| settings.persona = Persona::Sarcastic)
                .unwrap();

            let written = std::fs::read_to_string(&path).unwrap();
            assert!(!written.contains("env-only-secret"), "{written}");
            assert!(!written.contains("9100"), "{written}");

            let on_disk = file_only(&path);
            assert_eq!(on_disk.persona, Persona::Sarcastic);
            assert_eq!(on_disk.text_model, "file-model");
            assert_eq!(on_disk.gemini_api_key, "");

            let effective = store.settings();
            assert_eq!(effective.persona, Persona::Sarcastic);
            assert_eq!(effective.gemini_api_key, "env-only-secret");
            assert_eq!(effective.bind, "0.0.0.0:9100");
            Ok(())
        });
    }

    #[test]
    fn bad_bind_address_is_reported() {
        let settings = ChatSettings {
            bind: "not-an-address".to_string(),
            ..ChatSettings::default()
        };
        assert!(matches!(
            settings.bind_addr(),
            Err(SettingsError::InvalidBind { .. })
        ));
    }
}
