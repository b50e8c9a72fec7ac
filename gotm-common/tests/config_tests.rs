//! Configuration resolution and graceful degradation
//!
//! Uses serial_test because several tests manipulate GOTM_CONFIG and
//! GOTM_DISCORD_TOKEN.

use gotm_common::config::{
    load_config, resolve_config_path, resolve_discord_token, TomlConfig, CONFIG_ENV_VAR,
    TOKEN_ENV_VAR,
};
use serial_test::serial;
use std::env;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

fn write_config(dir: &Path, content: &str) -> PathBuf {
    let path = dir.join("config.toml");
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(content.as_bytes()).unwrap();
    path
}

#[test]
fn test_defaults() {
    let config = TomlConfig::default();
    assert_eq!(config.table_name, "beyond");
    assert_eq!(config.port, 5790);
    assert_eq!(config.election.check_interval(), Duration::from_secs(86_400));
    assert_eq!(config.election.guild_delay(), Duration::from_secs(1));
    assert!(config.election.remove_foreign_bots);
    assert_eq!(config.api.shared_secret, 0);
    assert_eq!(config.logging.level, "info");
    assert!(config.database_path().ends_with("gotm.db"));
}

#[test]
fn test_load_without_path_uses_defaults() {
    let config = load_config(None).unwrap();
    assert_eq!(config.table_name, "beyond");
}

#[test]
fn test_load_missing_file_degrades_to_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let config = load_config(Some(&dir.path().join("absent.toml"))).unwrap();
    assert_eq!(config.port, 5790);
}

#[test]
fn test_load_partial_file_fills_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(
        dir.path(),
        r#"
        table_name = "gotm_test"

        [election]
        guild_delay_ms = 250
        remove_foreign_bots = false
        "#,
    );

    let config = load_config(Some(&path)).unwrap();
    assert_eq!(config.table_name, "gotm_test");
    assert_eq!(config.election.guild_delay(), Duration::from_millis(250));
    assert!(!config.election.remove_foreign_bots);
    assert_eq!(config.election.check_interval_secs, 86_400);
    assert_eq!(config.discord.api_base, "https://discord.com/api/v10");
}

#[test]
fn test_load_malformed_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(dir.path(), "port = \"not a number\"");
    assert!(load_config(Some(&path)).is_err());
}

#[test]
#[serial]
fn test_cli_path_beats_environment() {
    env::set_var(CONFIG_ENV_VAR, "/tmp/from-env.toml");
    let resolved = resolve_config_path(Some(Path::new("/tmp/from-cli.toml")));
    env::remove_var(CONFIG_ENV_VAR);

    assert_eq!(resolved, Some(PathBuf::from("/tmp/from-cli.toml")));
}

#[test]
#[serial]
fn test_environment_path_used_without_cli() {
    env::set_var(CONFIG_ENV_VAR, "/tmp/from-env.toml");
    let resolved = resolve_config_path(None);
    env::remove_var(CONFIG_ENV_VAR);

    assert_eq!(resolved, Some(PathBuf::from("/tmp/from-env.toml")));
}

#[test]
#[serial]
fn test_token_prefers_environment() {
    let mut config = TomlConfig::default();
    config.discord.token = Some("toml-token".to_string());

    env::set_var(TOKEN_ENV_VAR, "env-token");
    let token = resolve_discord_token(&config).unwrap();
    env::remove_var(TOKEN_ENV_VAR);

    assert_eq!(token, "env-token");
}

#[test]
#[serial]
fn test_token_falls_back_to_toml() {
    env::remove_var(TOKEN_ENV_VAR);
    let mut config = TomlConfig::default();
    config.discord.token = Some("  toml-token  ".to_string());

    assert_eq!(resolve_discord_token(&config).unwrap(), "toml-token");
}

#[test]
#[serial]
fn test_missing_token_is_configuration_error() {
    env::remove_var(TOKEN_ENV_VAR);
    let mut config = TomlConfig::default();
    config.discord.token = Some("   ".to_string());

    let err = resolve_discord_token(&config).unwrap_err();
    assert!(matches!(err, gotm_common::Error::Config(_)));
    assert!(!err.is_retryable());
}
