// Settings loading: TOML files, secrets directory and environment overrides
use std::fs;

use passgate::settings::{PasskeydSettings, StorageBackend, SECRETS_DIR_ENV};
use serial_test::serial;

fn clean_env() {
    for var in [
        SECRETS_DIR_ENV,
        "HOST",
        "PORT",
        "PRINCIPAL_HEADER",
        "PASSKEY_RP_ID",
        "PASSKEY_RP_NAME",
        "PASSKEY_AUTHENTICATOR_ATTACHMENT",
        "STORAGE_BACKEND",
        "SESSION_SECRET",
    ] {
        std::env::remove_var(var);
    }
}

#[test]
#[serial]
fn test_secrets_dir_settings_are_loaded() {
    clean_env();
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("Settings.toml"),
        r#"
        [application]
        port = 9090
        principal_header = "X-Forwarded-User"

        [passkey]
        rp_id = "mail.example.com"
        rp_name = "Example Mail"
        authenticator_attachment = "platform"

        [session]
        session_secret = "from-secrets-dir"
        "#,
    )
    .unwrap();
    std::env::set_var(SECRETS_DIR_ENV, dir.path());

    let mut settings = PasskeydSettings::load_base_settings().unwrap();
    PasskeydSettings::apply_env_overrides(&mut settings).unwrap();

    assert_eq!(settings.get_bind_address(), "0.0.0.0:9090");
    assert_eq!(settings.application.principal_header, "X-Forwarded-User");
    assert_eq!(settings.session.session_secret, "from-secrets-dir");

    let policy = settings.relying_party_policy().unwrap();
    assert_eq!(policy.rp_id, "mail.example.com");
    assert_eq!(policy.rp_name, "Example Mail");
    assert_eq!(policy.authenticator_attachment.as_option_str(), Some("platform"));

    clean_env();
}

#[test]
#[serial]
fn test_env_overrides_win_over_files() {
    clean_env();
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("Settings.toml"),
        "[passkey]\nrp_id = \"file.example.com\"\n",
    )
    .unwrap();
    std::env::set_var(SECRETS_DIR_ENV, dir.path());
    std::env::set_var("PASSKEY_RP_ID", "env.example.com");
    std::env::set_var("PORT", "not-a-port");
    std::env::set_var("STORAGE_BACKEND", "file");

    let mut settings = PasskeydSettings::load_base_settings().unwrap();
    PasskeydSettings::apply_env_overrides(&mut settings).unwrap();

    assert_eq!(settings.passkey.rp_id, "env.example.com");
    assert_eq!(settings.application.port, 8080);
    assert_eq!(settings.storage.backend, StorageBackend::File);
    assert!(!settings.session.session_secret.is_empty());

    clean_env();
}

#[test]
#[serial]
fn test_malformed_settings_file_is_an_error() {
    clean_env();
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("Settings.toml"), "[passkey\nrp_id = ").unwrap();
    std::env::set_var(SECRETS_DIR_ENV, dir.path());

    assert!(PasskeydSettings::load_base_settings().is_err());

    clean_env();
}

#[test]
fn test_default_settings_build_a_service() {
    let settings = PasskeydSettings::default();
    let service = passgate::PasskeyService::new(
        settings.toggles(),
        settings.relying_party_policy().unwrap(),
        settings.blob_store(),
    );
    assert!(service.is_enabled());
    assert_eq!(service.policy().timeout_ms, 60_000);
}
