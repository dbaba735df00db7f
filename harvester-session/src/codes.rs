//! Login result codes from the session collaborator.
//!
//! The bridge speaks numeric status codes; the engine works with this closed
//! enum. Codes fall into three families: success, transient (rate limit,
//! timeout, service hiccups — retried with backoff), and disqualifying
//! (terminal for the account, recorded, never retried).

use std::fmt;

/// Result of a login-family call on the session collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginCode {
    Ok,
    Fail,
    Timeout,
    ServiceUnavailable,
    PasswordUnset,
    AccountLogonDenied,
    AccountDisabled,
    RateLimitExceeded,
    TwoFactorRequired,
    Unknown(i32),
}

impl LoginCode {
    pub const OK: i32 = 1;
    pub const FAIL: i32 = 2;
    pub const TIMEOUT: i32 = 16;
    pub const SERVICE_UNAVAILABLE: i32 = 20;
    pub const PASSWORD_UNSET: i32 = 38;
    pub const ACCOUNT_LOGON_DENIED: i32 = 63;
    pub const ACCOUNT_DISABLED: i32 = 65;
    pub const RATE_LIMIT_EXCEEDED: i32 = 84;
    pub const TWO_FACTOR_REQUIRED: i32 = 85;

    const KNOWN: [LoginCode; 9] = [
        LoginCode::Ok,
        LoginCode::Fail,
        LoginCode::Timeout,
        LoginCode::ServiceUnavailable,
        LoginCode::PasswordUnset,
        LoginCode::AccountLogonDenied,
        LoginCode::AccountDisabled,
        LoginCode::RateLimitExceeded,
        LoginCode::TwoFactorRequired,
    ];

    pub fn from_status(code: i32) -> Self {
        Self::KNOWN
            .into_iter()
            .find(|known| known.as_status() == code)
            .unwrap_or(LoginCode::Unknown(code))
    }

    pub fn as_status(self) -> i32 {
        match self {
            LoginCode::Ok => Self::OK,
            LoginCode::Fail => Self::FAIL,
            LoginCode::Timeout => Self::TIMEOUT,
            LoginCode::ServiceUnavailable => Self::SERVICE_UNAVAILABLE,
            LoginCode::PasswordUnset => Self::PASSWORD_UNSET,
            LoginCode::AccountLogonDenied => Self::ACCOUNT_LOGON_DENIED,
            LoginCode::AccountDisabled => Self::ACCOUNT_DISABLED,
            LoginCode::RateLimitExceeded => Self::RATE_LIMIT_EXCEEDED,
            LoginCode::TwoFactorRequired => Self::TWO_FACTOR_REQUIRED,
            LoginCode::Unknown(code) => code,
        }
    }

    pub fn is_ok(self) -> bool {
        self == LoginCode::Ok
    }

    pub fn is_rate_limited(self) -> bool {
        self == LoginCode::RateLimitExceeded
    }

    /// Codes that permanently disable an account: retrying cannot help and
    /// only burns login attempts against the remote service.
    pub fn is_disqualifying(self) -> bool {
        matches!(
            self,
            LoginCode::AccountLogonDenied
                | LoginCode::AccountDisabled
                | LoginCode::TwoFactorRequired
                | LoginCode::PasswordUnset
        )
    }
}

impl fmt::Display for LoginCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoginCode::Ok => write!(f, "ok"),
            LoginCode::Fail => write!(f, "fail"),
            LoginCode::Timeout => write!(f, "timeout"),
            LoginCode::ServiceUnavailable => write!(f, "service_unavailable"),
            LoginCode::PasswordUnset => write!(f, "password_unset"),
            LoginCode::AccountLogonDenied => write!(f, "account_logon_denied"),
            LoginCode::AccountDisabled => write!(f, "account_disabled"),
            LoginCode::RateLimitExceeded => write!(f, "rate_limit_exceeded"),
            LoginCode::TwoFactorRequired => write!(f, "two_factor_required"),
            LoginCode::Unknown(code) => write!(f, "unknown({code})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_roundtrip_for_known_codes() {
        for code in [
            LoginCode::Ok,
            LoginCode::Fail,
            LoginCode::RateLimitExceeded,
            LoginCode::AccountLogonDenied,
            LoginCode::TwoFactorRequired,
        ] {
            assert_eq!(LoginCode::from_status(code.as_status()), code);
        }
    }

    #[test]
    fn unknown_codes_preserve_raw_status() {
        let code = LoginCode::from_status(4242);
        assert_eq!(code, LoginCode::Unknown(4242));
        assert_eq!(code.as_status(), 4242);
        assert!(!code.is_disqualifying());
    }

    #[test]
    fn disqualifying_family() {
        assert!(LoginCode::AccountLogonDenied.is_disqualifying());
        assert!(LoginCode::AccountDisabled.is_disqualifying());
        assert!(LoginCode::TwoFactorRequired.is_disqualifying());
        assert!(LoginCode::PasswordUnset.is_disqualifying());
        assert!(!LoginCode::RateLimitExceeded.is_disqualifying());
        assert!(!LoginCode::Fail.is_disqualifying());
    }
}
