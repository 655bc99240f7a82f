use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context};

use crate::passkey::{BlobStore, FileBlobStore, MemoryBlobStore, PasskeyToggles};
use crate::utils::cookie::CookieFactory;
use crate::utils::crypto;
use crate::webauthn::{AuthenticatorAttachment, RelyingPartyPolicy, UserVerificationRequirement};

/// Directory that may hold a higher-priority `Settings.toml`
pub const SECRETS_DIR_ENV: &str = "PASSGATE_SECRETS_DIR";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PasskeydSettings {
    pub application: ApplicationSettings,
    pub passkey: PasskeySettings,
    pub storage: StorageSettings,
    pub session: SessionSettings,
    pub cookies: CookieSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationSettings {
    pub host: String,
    pub port: u16,
    /// Trusted header naming the principal logged in upstream
    pub principal_header: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PasskeySettings {
    pub enabled: bool,
    pub always_enabled: bool,
    /// Activation state for principals that never chose one
    pub activate: bool,
    pub always_activated: bool,
    pub rp_id: String,
    pub rp_name: String,
    pub timeout_ms: u64,
    pub user_verification: String,
    pub authenticator_attachment: String,
    pub allow_subdomains: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    File,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub backend: StorageBackend,
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    pub session_secret: String,
    pub session_duration_hours: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CookieSettings {
    pub secure: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
}

impl Default for ApplicationSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            principal_header: "X-Remote-User".to_string(),
        }
    }
}

impl Default for PasskeySettings {
    fn default() -> Self {
        Self {
            enabled: true,
            always_enabled: false,
            activate: false,
            always_activated: false,
            rp_id: "localhost".to_string(),
            rp_name: "Passgate".to_string(),
            timeout_ms: 60_000,
            user_verification: "preferred".to_string(),
            authenticator_attachment: String::new(),
            allow_subdomains: true,
        }
    }
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Memory,
            path: "data/passkeys".to_string(),
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            session_secret: String::new(), // Will be generated if empty
            session_duration_hours: 8,
        }
    }
}

impl Default for CookieSettings {
    fn default() -> Self {
        Self { secure: true }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl PasskeydSettings {
    /// Load settings from configuration files and environment variables
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - A settings file cannot be read or parsed
    /// - A session secret must be generated and the random source fails
    pub fn load() -> anyhow::Result<Self> {
        Self::load_env_file();

        let mut settings = Self::load_base_settings()?;
        Self::apply_env_overrides(&mut settings)?;
        Self::init_logging(&settings.logging.level);

        Ok(settings)
    }

    /// Initialize `env_logger`, preferring `RUST_LOG` over the configured level
    fn init_logging(level: &str) {
        let env = env_logger::Env::default().default_filter_or(level);
        if env_logger::Builder::from_env(env).try_init().is_err() {
            log::debug!("Logger already initialized");
        }
    }

    /// Load base settings from TOML file(s) or use defaults
    /// Settings are loaded with the following priority (highest to lowest):
    /// 1. Environment variables (applied separately after loading base settings)
    /// 2. Settings.toml in `PASSGATE_SECRETS_DIR` (if specified and exists)
    /// 3. Settings.toml in current directory (if exists)
    /// 4. Default settings
    ///
    /// # Errors
    ///
    /// Returns an error if a settings file cannot be read or parsed
    pub fn load_base_settings() -> anyhow::Result<Self> {
        let mut settings = Self::default();

        let default_config_path = PathBuf::from("Settings.toml");
        if default_config_path.exists() {
            settings = Self::from_file(&default_config_path)?;
            println!(
                "✓ Loaded base settings from {}",
                default_config_path.display()
            );
        }

        if let Ok(secrets_dir) = std::env::var(SECRETS_DIR_ENV) {
            let secrets_path = Path::new(&secrets_dir).join("Settings.toml");
            if secrets_path.exists() {
                settings = Self::from_file(&secrets_path)?;
                println!("✓ Overriding settings from {}", secrets_path.display());
            } else {
                println!(
                    "ℹ {SECRETS_DIR_ENV} set but no Settings.toml found at: {}",
                    secrets_path.display()
                );
            }
        }

        Ok(settings)
    }

    /// Parse a TOML settings file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not valid settings TOML
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        basic_toml::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
    }

    /// Apply environment variable overrides to settings
    ///
    /// # Errors
    ///
    /// Returns an error if a session secret must be generated and the random
    /// source fails
    pub fn apply_env_overrides(settings: &mut Self) -> anyhow::Result<()> {
        Self::apply_application_env_overrides(&mut settings.application);
        Self::apply_passkey_env_overrides(&mut settings.passkey);
        Self::apply_storage_env_overrides(&mut settings.storage);
        Self::apply_session_env_overrides(&mut settings.session)?;
        Self::apply_cookie_env_overrides(&mut settings.cookies);
        Self::apply_logging_env_overrides(&mut settings.logging);
        Ok(())
    }

    fn apply_application_env_overrides(app_settings: &mut ApplicationSettings) {
        if let Ok(host) = std::env::var("HOST") {
            app_settings.host = host;
        }
        if let Ok(port_str) = std::env::var("PORT") {
            if let Ok(port) = port_str.parse::<u16>() {
                app_settings.port = port;
            }
        }
        if let Ok(header) = std::env::var("PRINCIPAL_HEADER") {
            app_settings.principal_header = header;
        }
    }

    fn apply_passkey_env_overrides(passkey: &mut PasskeySettings) {
        Self::apply_bool_env_override("PASSKEY_ENABLED", &mut passkey.enabled);
        Self::apply_numeric_env_override("PASSKEY_TIMEOUT_MS", &mut passkey.timeout_ms);
        if let Ok(rp_id) = std::env::var("PASSKEY_RP_ID") {
            passkey.rp_id = rp_id;
        }
        if let Ok(rp_name) = std::env::var("PASSKEY_RP_NAME") {
            passkey.rp_name = rp_name;
        }
        if let Ok(uv) = std::env::var("PASSKEY_USER_VERIFICATION") {
            passkey.user_verification = uv;
        }
        if let Ok(attachment) = std::env::var("PASSKEY_AUTHENTICATOR_ATTACHMENT") {
            passkey.authenticator_attachment = attachment;
        }
    }

    fn apply_storage_env_overrides(storage: &mut StorageSettings) {
        match std::env::var("STORAGE_BACKEND").as_deref().map(str::trim) {
            Ok("memory") => storage.backend = StorageBackend::Memory,
            Ok("file") => storage.backend = StorageBackend::File,
            Ok(other) => eprintln!("⚠️  Ignoring unknown STORAGE_BACKEND {other:?}"),
            Err(_) => {}
        }
        if let Ok(path) = std::env::var("STORAGE_PATH") {
            storage.path = path;
        }
    }

    /// Apply environment overrides for session settings
    ///
    /// # Errors
    ///
    /// Returns an error if a secret must be generated and the random source fails
    pub fn apply_session_env_overrides(session_settings: &mut SessionSettings) -> anyhow::Result<()> {
        Self::apply_numeric_env_override(
            "SESSION_DURATION_HOURS",
            &mut session_settings.session_duration_hours,
        );

        match std::env::var("SESSION_SECRET") {
            Ok(secret) if !secret.is_empty() => session_settings.session_secret = secret,
            _ => {}
        }

        if session_settings.session_secret.is_empty() {
            session_settings.session_secret = crypto::generate_secret()?;
            Self::warn_about_generated_secret();
        }
        Ok(())
    }

    fn apply_numeric_env_override(env_var: &str, target: &mut u64) {
        if let Ok(value_str) = std::env::var(env_var) {
            if let Ok(value) = value_str.parse::<u64>() {
                *target = value;
            }
        }
    }

    fn apply_bool_env_override(env_var: &str, target: &mut bool) {
        if let Ok(value_str) = std::env::var(env_var) {
            if let Ok(value) = value_str.trim().parse::<bool>() {
                *target = value;
            }
        }
    }

    fn warn_about_generated_secret() {
        eprintln!("⚠️  WARNING: Using auto-generated session secret");
        eprintln!("🔒 For production use, set the SESSION_SECRET environment variable");
        eprintln!("   or configure session_secret in Settings.toml");
        eprintln!("💡 Passkey sessions will not survive a restart unless it is configured");
    }

    fn apply_cookie_env_overrides(cookie_settings: &mut CookieSettings) {
        Self::apply_bool_env_override("COOKIE_SECURE", &mut cookie_settings.secure);
    }

    fn apply_logging_env_overrides(logging_settings: &mut LoggingSettings) {
        if let Ok(log_level) = std::env::var("RUST_LOG") {
            logging_settings.level = log_level;
        }
    }

    /// Load environment variables from .env file
    fn load_env_file() {
        if let Ok(contents) = std::fs::read_to_string(".env") {
            for line in contents.lines() {
                let line = line.trim();
                if line.starts_with('#') {
                    continue;
                }
                if let Some((key, value)) = line.split_once('=') {
                    std::env::set_var(key.trim(), value.trim());
                }
            }
        }
    }

    /// Get the bind address for the server
    #[must_use]
    pub fn get_bind_address(&self) -> String {
        format!("{}:{}", self.application.host, self.application.port)
    }

    /// Build the immutable relying-party policy
    ///
    /// # Errors
    ///
    /// Returns an error for an invalid `rp_id`, a zero timeout or unknown
    /// user-verification / attachment values
    pub fn relying_party_policy(&self) -> anyhow::Result<RelyingPartyPolicy> {
        let passkey = &self.passkey;
        let user_verification: UserVerificationRequirement = passkey
            .user_verification
            .parse()
            .map_err(|e| anyhow!("passkey.user_verification: {e}"))?;
        let attachment: AuthenticatorAttachment = passkey
            .authenticator_attachment
            .parse()
            .map_err(|e| anyhow!("passkey.authenticator_attachment: {e}"))?;

        RelyingPartyPolicy::new(
            &passkey.rp_id,
            &passkey.rp_name,
            passkey.timeout_ms,
            user_verification,
            attachment,
        )
        .map(|policy| policy.with_subdomains(passkey.allow_subdomains))
        .map_err(|e| anyhow!("passkey settings: {e}"))
    }

    #[must_use]
    pub fn toggles(&self) -> PasskeyToggles {
        PasskeyToggles {
            enabled: self.passkey.enabled || self.passkey.always_enabled,
            default_activation: self.passkey.activate,
            always_activated: self.passkey.always_activated,
        }
    }

    #[must_use]
    pub fn cookie_factory(&self) -> CookieFactory {
        CookieFactory::new(
            &self.session.session_secret,
            self.cookies.secure,
            self.session.session_duration_hours,
        )
    }

    /// Instantiate the configured credential backend
    #[must_use]
    pub fn blob_store(&self) -> Arc<dyn BlobStore> {
        match self.storage.backend {
            StorageBackend::Memory => Arc::new(MemoryBlobStore::new()),
            StorageBackend::File => Arc::new(FileBlobStore::new(&self.storage.path)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clean_env_vars() {
        for var in [
            "SESSION_SECRET",
            "SESSION_DURATION_HOURS",
            "PASSKEY_ENABLED",
            "PASSKEY_RP_ID",
            "PASSKEY_TIMEOUT_MS",
            "PASSKEY_USER_VERIFICATION",
            "STORAGE_BACKEND",
            "STORAGE_PATH",
            "COOKIE_SECURE",
            SECRETS_DIR_ENV,
        ] {
            std::env::remove_var(var);
        }
    }

    #[test]
    fn test_defaults() {
        let settings = PasskeydSettings::default();
        assert_eq!(settings.application.principal_header, "X-Remote-User");
        assert_eq!(settings.passkey.timeout_ms, 60_000);
        assert_eq!(settings.storage.backend, StorageBackend::Memory);
        assert_eq!(settings.session.session_duration_hours, 8);

        let policy = settings.relying_party_policy().unwrap();
        assert_eq!(policy.rp_id, "localhost");
        assert_eq!(policy.authenticator_attachment, AuthenticatorAttachment::None);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let settings: PasskeydSettings = basic_toml::from_str(
            r#"
            [passkey]
            rp_id = "mail.example.com"
            user_verification = "required"

            [storage]
            backend = "file"
            "#,
        )
        .unwrap();
        assert_eq!(settings.passkey.rp_name, "Passgate");
        assert_eq!(settings.storage.backend, StorageBackend::File);
        assert_eq!(settings.storage.path, "data/passkeys");
        assert!(settings
            .relying_party_policy()
            .unwrap()
            .requires_user_verification());
    }

    #[test]
    fn test_invalid_policy_values() {
        let mut settings = PasskeydSettings::default();
        settings.passkey.user_verification = "sometimes".into();
        assert!(settings.relying_party_policy().is_err());

        let mut settings = PasskeydSettings::default();
        settings.passkey.timeout_ms = 0;
        assert!(settings.relying_party_policy().is_err());

        let mut settings = PasskeydSettings::default();
        settings.passkey.rp_id = "https://example.com".into();
        assert!(settings.relying_party_policy().is_err());
    }

    #[test]
    fn test_toggles() {
        let mut settings = PasskeydSettings::default();
        settings.passkey.enabled = false;
        settings.passkey.always_enabled = true;
        settings.passkey.activate = true;
        let toggles = settings.toggles();
        assert!(toggles.enabled);
        assert!(toggles.default_activation);
        assert!(!toggles.always_activated);
    }

    #[test]
    #[serial]
    fn test_session_env_overrides() {
        clean_env_vars();
        let mut session = SessionSettings {
            session_secret: "configured".into(),
            session_duration_hours: 8,
        };
        std::env::set_var("SESSION_SECRET", "from-env");
        std::env::set_var("SESSION_DURATION_HOURS", "12");
        PasskeydSettings::apply_session_env_overrides(&mut session).unwrap();
        assert_eq!(session.session_secret, "from-env");
        assert_eq!(session.session_duration_hours, 12);
        clean_env_vars();
    }

    #[test]
    #[serial]
    fn test_session_secret_auto_generation() {
        clean_env_vars();
        let mut first = SessionSettings::default();
        let mut second = SessionSettings::default();
        PasskeydSettings::apply_session_env_overrides(&mut first).unwrap();
        PasskeydSettings::apply_session_env_overrides(&mut second).unwrap();
        assert!(first.session_secret.len() > 40);
        assert_ne!(first.session_secret, second.session_secret);
        clean_env_vars();
    }

    #[test]
    #[serial]
    fn test_passkey_and_storage_env_overrides() {
        clean_env_vars();
        std::env::set_var("PASSKEY_ENABLED", "false");
        std::env::set_var("PASSKEY_RP_ID", "example.org");
        std::env::set_var("PASSKEY_TIMEOUT_MS", "30000");
        std::env::set_var("STORAGE_BACKEND", "file");
        std::env::set_var("STORAGE_PATH", "/var/lib/passgate");
        std::env::set_var("COOKIE_SECURE", "false");

        let mut settings = PasskeydSettings::default();
        PasskeydSettings::apply_env_overrides(&mut settings).unwrap();
        assert!(!settings.passkey.enabled);
        assert_eq!(settings.passkey.rp_id, "example.org");
        assert_eq!(settings.passkey.timeout_ms, 30_000);
        assert_eq!(settings.storage.backend, StorageBackend::File);
        assert_eq!(settings.storage.path, "/var/lib/passgate");
        assert!(!settings.cookies.secure);

        clean_env_vars();
    }

    #[test]
    #[serial]
    fn test_unknown_storage_backend_keeps_configured_one() {
        clean_env_vars();
        std::env::set_var("STORAGE_BACKEND", "redis");
        let mut storage = StorageSettings {
            backend: StorageBackend::File,
            path: "/srv/passkeys".into(),
        };
        PasskeydSettings::apply_storage_env_overrides(&mut storage);
        assert_eq!(storage.backend, StorageBackend::File);
        clean_env_vars();
    }
}
