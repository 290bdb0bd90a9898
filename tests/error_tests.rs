// Error handling tests
// Author: kelexine (https://github.com/kelexine)

use hoopguard::auth::Tier;
use hoopguard::error::GuardError;
use hoopguard::utils::retry::Retryable;
use hoopguard::vault::VaultError;

#[test]
fn test_error_display_messages() {
    let errors = vec![
        GuardError::Vault {
            key_id: "0123456789abcdef".to_string(),
        },
        GuardError::KeyNotFound("0123456789abcdef".to_string()),
        GuardError::KeyInactive("0123456789abcdef".to_string()),
        GuardError::CacheBackend("disk full".to_string()),
        GuardError::InvalidParameter("bad endpoint".to_string()),
        GuardError::Config("bad tier".to_string()),
        GuardError::Internal("oops".to_string()),
    ];

    for error in errors {
        let display = format!("{}", error);
        assert!(!display.is_empty(), "Error should have display message");
    }
}

#[test]
fn test_rate_limit_error_surfaces_quota() {
    let error = GuardError::RateLimitExceeded {
        tier: Tier::Pro,
        hourly_remaining: 12,
        minute_remaining: 0,
        retry_after_seconds: 42,
    };
    let display = format!("{}", error);
    assert!(display.contains("pro"));
    assert!(display.contains("minute remaining: 0"));
    assert!(display.contains("42s"));
    assert_eq!(error.retry_after(), Some(42));
    assert_eq!(error.kind(), "rate_limit_exceeded");
    assert!(error.is_retryable());
}

#[test]
fn test_vault_error_hides_crypto_detail() {
    let error = GuardError::Vault {
        key_id: "0123456789abcdef".to_string(),
    };
    let display = format!("{}", error);
    assert!(display.contains("0123456789abcdef"));
    assert!(!display.to_lowercase().contains("tag"));
    assert!(!display.to_lowercase().contains("aes"));
    assert_eq!(error.kind(), "vault_error");
}

#[test]
fn test_vault_setup_conversion() {
    let error: GuardError = VaultError::MissingSecret.into();
    assert!(matches!(error, GuardError::VaultSetup(_)));
    assert!(!error.is_retryable());
}

#[test]
fn test_upstream_retry_classification() {
    let throttled = GuardError::Upstream {
        status: 429,
        message: "slow down".to_string(),
        retry_after_seconds: Some(3),
    };
    assert!(throttled.is_retryable());
    assert_eq!(throttled.retry_after(), Some(3));

    let missing = GuardError::Upstream {
        status: 404,
        message: "no such team".to_string(),
        retry_after_seconds: None,
    };
    assert!(!missing.is_retryable());
    assert_eq!(missing.retry_after(), None);
}

#[test]
fn test_caller_errors_not_retryable() {
    assert!(!GuardError::KeyInactive("k".to_string()).is_retryable());
    assert!(!GuardError::KeyNotFound("k".to_string()).is_retryable());
    assert!(!GuardError::InvalidParameter("p".to_string()).is_retryable());
    assert_eq!(GuardError::KeyInactive("k".to_string()).kind(), "key_inactive");
}
