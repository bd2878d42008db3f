use super::*;

/// # Safety
/// Callers must be the only test touching these keys.
unsafe fn clear_llm_env() {
    unsafe {
        std::env::remove_var("LLM_API_KEY_ENV");
        std::env::remove_var("LLM_MODEL");
        std::env::remove_var("LLM_BASE_URL");
        std::env::remove_var("LLM_REQUEST_TIMEOUT_SECS");
        std::env::remove_var("LLM_CONNECT_TIMEOUT_SECS");
        std::env::remove_var("SHAPEBOARD_TEST_KEY");
    }
}

// One test owns these keys; parallel tests would race on the environment.
#[test]
fn from_env_reads_key_and_overrides() {
    unsafe {
        clear_llm_env();
        std::env::set_var("LLM_API_KEY_ENV", "SHAPEBOARD_TEST_KEY");
    }
    let err = LlmConfig::from_env().unwrap_err();
    assert!(matches!(err, LlmError::MissingApiKey { var } if var == "SHAPEBOARD_TEST_KEY"));

    unsafe { std::env::set_var("SHAPEBOARD_TEST_KEY", "secret") };

    let cfg = LlmConfig::from_env().unwrap();
    assert_eq!(cfg.api_key, "secret");
    assert_eq!(cfg.model, DEFAULT_MODEL);
    assert_eq!(cfg.base_url, DEFAULT_ANTHROPIC_BASE_URL);
    assert_eq!(cfg.request_timeout, Duration::from_secs(DEFAULT_LLM_REQUEST_TIMEOUT_SECS));

    unsafe {
        std::env::set_var("LLM_BASE_URL", "http://localhost:9999/v1/");
        std::env::set_var("LLM_CONNECT_TIMEOUT_SECS", "3");
    }
    let cfg = LlmConfig::from_env().unwrap();
    assert_eq!(cfg.base_url, "http://localhost:9999/v1");
    assert_eq!(cfg.connect_timeout, Duration::from_secs(3));

    unsafe {
        std::env::set_var("LLM_BASE_URL", "ftp://nope");
    }
    assert!(matches!(LlmConfig::from_env(), Err(LlmError::ConfigParse(_))));

    unsafe { clear_llm_env() };
}
