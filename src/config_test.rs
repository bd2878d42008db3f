use super::*;

#[test]
fn env_parse_missing_returns_default() {
    let val: usize = env_parse("__SHAPEBOARD_TEST_MISSING__", 42);
    assert_eq!(val, 42);
}

#[test]
fn env_parse_present_valid() {
    unsafe { std::env::set_var("__SHAPEBOARD_TEST_VALID__", "99") };
    let val: usize = env_parse("__SHAPEBOARD_TEST_VALID__", 0);
    assert_eq!(val, 99);
    unsafe { std::env::remove_var("__SHAPEBOARD_TEST_VALID__") };
}

#[test]
fn env_parse_present_invalid_returns_default() {
    unsafe { std::env::set_var("__SHAPEBOARD_TEST_INVALID__", "soon") };
    let val: u64 = env_parse("__SHAPEBOARD_TEST_INVALID__", 7);
    assert_eq!(val, 7);
    unsafe { std::env::remove_var("__SHAPEBOARD_TEST_INVALID__") };
}

#[test]
fn room_defaults_match_documented_values() {
    let config = RoomConfig::default();
    assert_eq!(config.persist.idle, Duration::from_millis(500));
    assert_eq!(config.persist.max_wait, Duration::from_secs(2));
    assert_eq!(config.lock_ttl, Duration::from_secs(30));
    assert_eq!(config.history_retention, 200);
    assert_eq!(config.command_cache_capacity, 256);
    assert_eq!(config.ai.max_prompt_chars, 1000);
    assert_eq!(config.ai.command_timeout, Duration::from_secs(30));
}
