use chrono::NaiveDate;
use study_portal::keys::{RateLimitKey, SessionKey};
use uuid::Uuid;

#[test]
fn test_namespaces_do_not_overlap() {
    let id = Uuid::new_v4();
    let revoked = SessionKey::revoked(id);
    let login = RateLimitKey::login_name(&id.simple().to_string());

    assert!(revoked.as_str().starts_with("session:"));
    assert!(login.as_str().starts_with("ratelimit:"));
    assert_ne!(revoked, login);
}

#[test]
fn test_separators_in_user_input_are_escaped() {
    // A login name must not be able to impersonate another dimension.
    let forged = RateLimitKey::login_name("alice:ip:10.0.0.1");
    assert_eq!(
        forged.as_str(),
        "ratelimit:login:name:alice%3Aip%3A10.0.0.1"
    );
    assert_eq!(forged.as_str().matches(':').count(), 3);
}

#[test]
fn test_escaping_keeps_distinct_inputs_apart() {
    assert_ne!(RateLimitKey::login_name("a:b"), RateLimitKey::login_name("a_b"));
    assert_ne!(RateLimitKey::login_name("a:b"), RateLimitKey::login_name("a%3Ab"));
    assert_ne!(RateLimitKey::login_ip("::1"), RateLimitKey::login_ip("__1"));
}

#[test]
fn test_login_names_are_case_insensitive() {
    assert_eq!(
        RateLimitKey::login_name("Alice"),
        RateLimitKey::login_name(" alice ")
    );
}

#[test]
fn test_accounts_and_names_use_separate_windows() {
    assert_eq!(
        RateLimitKey::login_account(11).as_str(),
        "ratelimit:login:account:11"
    );
    assert_ne!(RateLimitKey::login_account(11), RateLimitKey::login_name("11"));
}

#[test]
fn test_download_key_carries_the_calendar_day() {
    let day = NaiveDate::from_ymd_opt(2024, 3, 9).unwrap();
    assert_eq!(
        RateLimitKey::daily_download(42, day).as_str(),
        "ratelimit:download:user:42:2024-03-09"
    );
}
