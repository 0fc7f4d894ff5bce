use mcp_sse_relay::config::AppConfig;
use serial_test::serial;
use std::env;
use std::fs;
use std::io::Write;
use std::time::Duration;

const BIN: &str = "mcp-sse-relay";

// Helper to clear environment variables that might interfere with tests
fn clear_env_vars() {
    unsafe {
        env::remove_var("RELAY_SERVER__PORT");
        env::remove_var("RELAY_RELAY__KEEPALIVE_SECS");
        env::remove_var("RELAY_SEARCH__API_KEY");
        env::remove_var("CONFIG_FILE");
        env::remove_var("BIND_HOST");
        env::remove_var("PORT");
        env::remove_var("KEEPALIVE_SECS");
        env::remove_var("DELIVERY_TIMEOUT_SECS");
        env::remove_var("TAVILY_API_KEY");
    }
}

fn yaml_file(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(".yaml")
        .tempfile()
        .expect("Failed to create temp config");
    file.write_all(contents.as_bytes())
        .expect("Failed to write temp config");
    file
}

#[test]
#[serial]
fn test_default_config() {
    clear_env_vars();

    let config = AppConfig::load_from_args([BIN]).expect("Failed to load config");
    assert_eq!(config.server.port, 3000);
    assert_eq!(config.server.host, "0.0.0.0");
    assert_eq!(config.relay.sse_path, "/sse");
    assert_eq!(config.relay.messages_path, "/messages");
    assert_eq!(config.relay.keepalive_interval(), Duration::from_secs(30));
    assert_eq!(config.relay.delivery_timeout(), Some(Duration::from_secs(60)));
    assert!(config.search.api_key.is_none());
}

#[test]
#[serial]
fn test_env_override() {
    clear_env_vars();
    unsafe {
        env::set_var("RELAY_SERVER__PORT", "9090");
        env::set_var("RELAY_RELAY__KEEPALIVE_SECS", "5");
    }

    let config = AppConfig::load_from_args([BIN]).expect("Failed to load config");
    assert_eq!(config.server.port, 9090);
    assert_eq!(config.relay.keepalive_secs, 5);

    clear_env_vars();
}

#[test]
#[serial]
fn test_file_load() {
    clear_env_vars();

    let file = yaml_file(
        r#"
server:
  port: 7070
relay:
  delivery_timeout_secs: 0
  messages_path: /rpc
"#,
    );
    let path = file.path().to_str().expect("utf-8 temp path");

    let config = AppConfig::load_from_args([BIN, "--config", path])
        .expect("Failed to load config from file");
    assert_eq!(config.server.port, 7070);
    assert_eq!(config.relay.delivery_timeout(), None);
    assert_eq!(config.relay.messages_path, "/rpc");
    // Untouched keys keep their defaults.
    assert_eq!(config.relay.sse_path, "/sse");
}

#[test]
#[serial]
fn test_missing_explicit_file_is_an_error() {
    clear_env_vars();
    let result = AppConfig::load_from_args([BIN, "--config", "/nonexistent/relay.yaml"]);
    assert!(result.is_err());
}

#[test]
#[serial]
fn test_cli_beats_env_and_file() {
    clear_env_vars();

    let file = yaml_file("server:\n  port: 7070\n  host: 10.0.0.1\n");
    let path = file.path().to_str().expect("utf-8 temp path");
    unsafe {
        env::set_var("RELAY_SERVER__PORT", "9090");
    }

    let config = AppConfig::load_from_args([
        BIN,
        "--config",
        path,
        "--port",
        "8181",
        "--keepalive-secs",
        "10",
        "--search-api-key",
        "tvly-test",
    ])
    .expect("Failed to load config");

    assert_eq!(config.server.port, 8181);
    // File value survives where nothing overrides it.
    assert_eq!(config.server.host, "10.0.0.1");
    assert_eq!(config.relay.keepalive_secs, 10);
    assert_eq!(config.search.api_key.as_deref(), Some("tvly-test"));

    clear_env_vars();
}

#[test]
#[serial]
fn test_cwd_config_fallback() {
    clear_env_vars();

    let cwd_path = "config.yaml";
    fs::write(cwd_path, "server:\n  port: 6060\n").expect("Failed to write ./config.yaml");

    let config = AppConfig::load_from_args([BIN]);

    // Clean up before asserting so a failure doesn't leak the file into other tests.
    fs::remove_file(cwd_path).unwrap();

    assert_eq!(config.expect("Failed to load config").server.port, 6060);
}
