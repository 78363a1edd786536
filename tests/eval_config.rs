use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use clutter_eval::config::{load_env_file, EvalConfig};
use clutter_eval::PromptVariant;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "CLUTTER_EVAL_CONFIG",
        "OPENAI_API_KEY",
        "CLUTTER_EVAL_API_URL",
        "CLUTTER_EVAL_MODEL",
        "CLUTTER_EVAL_IMAGES_DIR",
        "CLUTTER_EVAL_RESULTS_DIR",
        "CLUTTER_EVAL_DELAY_MS",
        "CLUTTER_EVAL_TIMEOUT_SECS",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let toml = r#"
[api]
url = "http://localhost:8080/v1/chat/completions"
model = "gpt-4o-mini"
max_tokens = 2048
detail = "low"
timeout_secs = 45

[paths]
images_dir = "photos"
results_root = "out"

[pacing]
delay_ms = 250
"#;
    std::io::Write::write_all(&mut file, toml.as_bytes()).expect("write config");

    std::env::set_var("CLUTTER_EVAL_CONFIG", file.path());
    std::env::set_var("CLUTTER_EVAL_MODEL", "gpt-4o");
    std::env::set_var("CLUTTER_EVAL_DELAY_MS", "0");
    std::env::set_var("OPENAI_API_KEY", "sk-from-env");

    let cfg = EvalConfig::load().expect("load config");

    assert_eq!(cfg.api.url, "http://localhost:8080/v1/chat/completions");
    assert_eq!(cfg.api.model, "gpt-4o");
    assert_eq!(cfg.api.max_tokens, 2048);
    assert_eq!(cfg.api.detail, "low");
    assert_eq!(cfg.api.timeout, Duration::from_secs(45));
    assert_eq!(cfg.api.require_key().unwrap(), "sk-from-env");
    assert_eq!(cfg.images_dir, PathBuf::from("photos"));
    assert_eq!(cfg.request_delay, Duration::ZERO);
    assert_eq!(
        cfg.results_dir_for(PromptVariant::V1),
        PathBuf::from("out/test_results")
    );

    clear_env();
}

#[test]
fn rejects_unknown_keys_and_bad_numbers() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    std::io::Write::write_all(&mut file, b"[api]\nmodle = \"typo\"\n").expect("write config");
    std::env::set_var("CLUTTER_EVAL_CONFIG", file.path());
    let err = EvalConfig::load().unwrap_err();
    assert!(err.to_string().contains("invalid config file"));

    std::env::remove_var("CLUTTER_EVAL_CONFIG");
    std::env::set_var("CLUTTER_EVAL_DELAY_MS", "soon");
    let err = EvalConfig::load().unwrap_err();
    assert!(err.to_string().contains("CLUTTER_EVAL_DELAY_MS"));

    std::env::remove_var("CLUTTER_EVAL_DELAY_MS");
    std::env::set_var("CLUTTER_EVAL_API_URL", "not a url");
    assert!(EvalConfig::load().is_err());

    clear_env();
}

#[test]
fn env_file_does_not_override_process_env() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp env file");
    std::io::Write::write_all(
        &mut file,
        b"# local secrets\nOPENAI_API_KEY=sk-from-file\nCLUTTER_EVAL_MODEL=gpt-4o-mini\n",
    )
    .expect("write env file");
    std::env::set_var("CLUTTER_EVAL_MODEL", "gpt-4o");

    let applied = load_env_file(file.path()).expect("load env file");

    assert_eq!(applied, 1);
    assert_eq!(std::env::var("OPENAI_API_KEY").unwrap(), "sk-from-file");
    assert_eq!(std::env::var("CLUTTER_EVAL_MODEL").unwrap(), "gpt-4o");

    clear_env();
}
