//! Unit tests for validation.rs

use reply_tracker::models::{EmailAccount, ProviderKind};
use reply_tracker::validation::InputValidator;

fn account() -> EmailAccount {
    EmailAccount {
        id: "acc-1".to_string(),
        email: "me@example.com".to_string(),
        provider: ProviderKind::Microsoft,
        outbound_tracking_enabled: true,
        follow_up_awaiting_reply_days: Some(3),
        follow_up_needs_reply_days: Some(2),
        follow_up_auto_draft_enabled: false,
    }
}

#[test]
fn test_validate_identifier() {
    assert!(InputValidator::validate_identifier("Thread id", "18c2f0a9d1e").is_ok());
    assert!(InputValidator::validate_identifier("Thread id", "").is_err());
    assert!(InputValidator::validate_identifier("Thread id", "   ").is_err());
    assert!(InputValidator::validate_identifier("Thread id", "abc\u{7}").is_err());
    assert!(InputValidator::validate_identifier("Thread id", &"a".repeat(513)).is_err());
    assert!(InputValidator::validate_identifier("Thread id", &"a".repeat(512)).is_ok());
}

#[test]
fn test_validate_label_name() {
    assert!(InputValidator::validate_label_name("Awaiting Reply").is_ok());
    assert!(InputValidator::validate_label_name("").is_err());
    assert!(InputValidator::validate_label_name(" Padded").is_err());
    assert!(InputValidator::validate_label_name("Two\nLines").is_err());
    assert!(InputValidator::validate_label_name(&"é".repeat(225)).is_ok());
    assert!(InputValidator::validate_label_name(&"é".repeat(226)).is_err());
}

#[test]
fn test_validate_follow_up_days() {
    assert!(InputValidator::validate_follow_up_days(0).is_err());
    assert!(InputValidator::validate_follow_up_days(1).is_ok());
    assert!(InputValidator::validate_follow_up_days(365).is_ok());
    assert!(InputValidator::validate_follow_up_days(366).is_err());
}

#[test]
fn test_validate_eligibility_window() {
    assert!(InputValidator::validate_eligibility_window(0).is_ok());
    assert!(InputValidator::validate_eligibility_window(1440).is_ok());
    assert!(InputValidator::validate_eligibility_window(1441).is_err());
}

#[test]
fn test_validate_account() {
    assert!(InputValidator::validate_account(&account()).is_ok());

    let mut no_at = account();
    no_at.email = "me.example.com".to_string();
    assert!(InputValidator::validate_account(&no_at).is_err());

    let mut zero_days = account();
    zero_days.follow_up_needs_reply_days = Some(0);
    assert!(InputValidator::validate_account(&zero_days).is_err());

    let mut disabled = account();
    disabled.follow_up_awaiting_reply_days = None;
    disabled.follow_up_needs_reply_days = None;
    assert!(InputValidator::validate_account(&disabled).is_ok());
}

#[test]
fn test_validate_database_url() {
    assert!(InputValidator::validate_database_url("sqlite:data/reply_tracker.db").is_ok());
    assert!(InputValidator::validate_database_url("sqlite:///tmp/tracker.db").is_ok());
    assert!(InputValidator::validate_database_url("").is_err());
    assert!(InputValidator::validate_database_url("mysql://localhost/db").is_err());
    assert!(InputValidator::validate_database_url(&format!("sqlite:{}", "a".repeat(1000))).is_err());
}
