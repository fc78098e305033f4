//! Access credential and its expiry claim

use std::fmt;
use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};

/// Short-lived bearer credential, held in memory only.
///
/// The expiry comes from the token's `exp` claim, read without verifying the
/// signature; it only drives proactive renewal, never authorization.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessCredential {
    token: String,
    expires_at: Option<DateTime<Utc>>,
}

impl AccessCredential {
    pub fn new(token: impl Into<String>) -> Self {
        let token = token.into();
        let expires_at = decode_expiry(&token);
        Self { token, expires_at }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    /// `None` when the token carries no readable `exp` claim.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }
}

impl fmt::Debug for AccessCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessCredential")
            .field("token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Read the `exp` claim (seconds since the epoch) from a JWT payload.
fn decode_expiry(token: &str) -> Option<DateTime<Utc>> {
    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    let claims: serde_json::Value = serde_json::from_slice(&bytes).ok()?;
    let exp = claims.get("exp")?;
    let secs = exp.as_i64().or_else(|| exp.as_f64().map(|f| f as i64))?;
    DateTime::from_timestamp(secs, 0)
}

/// Delay until a proactive renewal should fire: `skew` ahead of expiry, but
/// never sooner than `floor`.
pub fn proactive_delay(
    expires_at: DateTime<Utc>,
    now: DateTime<Utc>,
    skew: Duration,
    floor: Duration,
) -> Duration {
    let lead = (expires_at - now)
        .to_std()
        .ok()
        .and_then(|remaining| remaining.checked_sub(skew))
        .unwrap_or(Duration::ZERO);
    lead.max(floor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::mint_token;
    use chrono::Duration as ChronoDuration;

    const SKEW: Duration = Duration::from_secs(180);
    const FLOOR: Duration = Duration::from_secs(5);

    #[test]
    fn test_decode_expiry() {
        let exp = DateTime::from_timestamp(1_900_000_000, 0).unwrap();
        let cred = AccessCredential::new(mint_token("u1", exp));
        assert_eq!(cred.expires_at(), Some(exp));
    }

    #[test]
    fn test_opaque_token_has_no_expiry() {
        assert_eq!(AccessCredential::new("not-a-jwt").expires_at(), None);
        assert_eq!(AccessCredential::new("a.%%%.c").expires_at(), None);
    }

    #[test]
    fn test_debug_redacts_token() {
        let cred = AccessCredential::new("secret-token");
        assert!(!format!("{:?}", cred).contains("secret-token"));
    }

    #[test]
    fn test_delay_fires_skew_before_expiry() {
        let now = Utc::now();
        let delay = proactive_delay(now + ChronoDuration::minutes(10), now, SKEW, FLOOR);
        assert_eq!(delay, Duration::from_secs(7 * 60));
    }

    #[test]
    fn test_delay_inside_skew_window_uses_floor() {
        let now = Utc::now();
        let delay = proactive_delay(now + ChronoDuration::minutes(2), now, SKEW, FLOOR);
        assert_eq!(delay, FLOOR);
    }

    #[test]
    fn test_delay_already_expired_uses_floor() {
        let now = Utc::now();
        let delay = proactive_delay(now - ChronoDuration::minutes(1), now, SKEW, FLOOR);
        assert_eq!(delay, FLOOR);
    }
}
