//! Per-account login state machine.
//!
//! One [`AccountSession`] drives one account through relogin, password login
//! and the bounded retry loop. Rate-limit backoff sleeps are taken while
//! holding the process-wide login gate, so concurrent accounts never compound
//! the remote limit; disqualifying codes end the account permanently and are
//! never retried.

use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{error, info, warn};

use harvester_core::records::unix_seconds_now;

use crate::codes::LoginCode;
use crate::error::SessionError;
use crate::guard;
use crate::ports::RemoteSession;

/// Terminal outcome of one account's login attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginOutcome {
    Success,
    /// A disqualifying code came back; the caller records the permanent
    /// disablement (`enabled = false`, `last_status`) before continuing.
    Disabled { code: LoginCode },
    ExhaustedRetries { last: LoginCode },
}

/// Login driver for a single account.
pub struct AccountSession<'a> {
    remote: &'a dyn RemoteSession,
    /// Process-wide gate serializing rate-limited retries and interactive
    /// prompts.
    gate: &'a Mutex<()>,
    username: &'a str,
    password: &'a str,
    two_factor_secret: Option<String>,
    retry_count: u32,
    interactive: bool,
}

impl<'a> AccountSession<'a> {
    pub fn new(
        remote: &'a dyn RemoteSession,
        gate: &'a Mutex<()>,
        username: &'a str,
        password: &'a str,
        two_factor_secret: Option<String>,
        retry_count: u32,
        interactive: bool,
    ) -> Self {
        Self {
            remote,
            gate,
            username,
            password,
            two_factor_secret,
            retry_count,
            interactive,
        }
    }

    /// Run the login machine to a terminal outcome.
    ///
    /// Transport failures (`Err`) abort the account for this run; they are
    /// distinct from remote result codes, which drive the retry loop.
    pub async fn login(&self) -> Result<LoginOutcome, SessionError> {
        info!(user = %self.username, "logging in");

        let mut result = self.remote.relogin().await?;
        let mut wait_secs = 1u64;
        if !result.is_ok() {
            if result != LoginCode::Fail {
                warn!(user = %self.username, code = %result, "relogin failed");
            }
            if result.is_rate_limited() {
                self.backoff(wait_secs).await;
            }
            result = self.password_login().await?;
        }

        let mut remaining = self.retry_count;
        while !result.is_ok() && remaining > 0 {
            if self.interactive {
                let _gate = self.gate.lock().await;
                warn!(user = %self.username, "falling back to interactive login");
                result = self.remote.interactive_login(self.username, self.password).await?;
                break;
            }
            if result.is_disqualifying() {
                warn!(user = %self.username, code = %result, "account disqualified");
                return Ok(LoginOutcome::Disabled { code: result });
            }
            if result.is_rate_limited() {
                self.backoff(wait_secs).await;
                result = self.password_login().await?;
            }
            wait_secs += 1;
            remaining -= 1;
            if !result.is_ok() {
                error!(user = %self.username, code = %result, "login attempt failed");
            }
        }

        if result.is_ok() {
            info!(user = %self.username, "login successful");
            Ok(LoginOutcome::Success)
        } else {
            error!(user = %self.username, code = %result, "login failed");
            Ok(LoginOutcome::ExhaustedRetries { last: result })
        }
    }

    async fn password_login(&self) -> Result<LoginCode, SessionError> {
        let one_time_code = match &self.two_factor_secret {
            Some(secret) => Some(guard::one_time_code(secret, unix_seconds_now())?),
            None => None,
        };
        self.remote
            .login(self.username, self.password, one_time_code.as_deref())
            .await
    }

    /// Linear backoff under the login gate; every rate-limited account in the
    /// process queues behind this lock.
    async fn backoff(&self, wait_secs: u64) {
        let _gate = self.gate.lock().await;
        tokio::time::sleep(Duration::from_secs(wait_secs)).await;
    }
}
