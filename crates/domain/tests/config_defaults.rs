use dq_domain::config::Config;

#[test]
fn default_host_is_localhost() {
    let config = Config::default();
    assert_eq!(config.server.host, "127.0.0.1");
}

#[test]
fn explicit_zero_host_parses() {
    let toml_str = r#"
[server]
host = "0.0.0.0"
port = 8420
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    assert_eq!(config.server.host, "0.0.0.0");
}

#[test]
fn spec_defaults() {
    let config = Config::default();
    assert_eq!(config.runtime.large_table_threshold, 1000);
    assert_eq!(config.runtime.history_window, 10);
    assert_eq!(config.runtime.workflow_timeout_s, 300);
    assert_eq!(config.runtime.step_timeout_s, 120);
    assert_eq!(config.llm.embedding.dim, 1536);
    assert_eq!(config.ledger.retention_days, 90);
    assert!((config.llm.default_temperature - 0.1).abs() < f32::EPSILON);
}

#[test]
fn validate_flags_zero_threshold() {
    let mut config = Config::default();
    config.runtime.large_table_threshold = 0;
    let issues = config.validate();
    assert!(issues
        .iter()
        .any(|e| e.field == "runtime.large_table_threshold"));
}

#[test]
fn validate_warns_on_missing_providers() {
    let config = Config::default();
    let issues = config.validate();
    assert!(issues.iter().any(|e| e.field == "llm.providers"));
}

#[test]
fn tier_models_parse_from_toml() {
    let toml_str = r#"
[llm.tiers]
classifier = "local/qwen3"
complex = "openai/gpt-4o"
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    assert_eq!(config.llm.tiers.classifier, "local/qwen3");
    assert_eq!(config.llm.tiers.complex, "openai/gpt-4o");
    // Unset tiers keep defaults.
    assert!(!config.llm.tiers.simple.is_empty());
}
