use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::time::{timeout, Duration};

use crate::error::TradingError;
use crate::ports::SubscriptionPort;
use crate::session::StopReasonCode;
use crate::Result;

/// Validated user id: non-blank and usable inside a job key
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserIdentity(String);

impl UserIdentity {
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(TradingError::Validation("user_id must not be blank".to_string()));
        }
        if trimmed.contains(':') {
            return Err(TradingError::Validation(format!(
                "user_id '{trimmed}' must not contain ':'"
            )));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Entitlement check in front of every session start
pub struct TradePermissionGuard {
    subscriptions: Arc<dyn SubscriptionPort>,
    lookup_timeout: Duration,
}

impl TradePermissionGuard {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

    pub fn new(subscriptions: Arc<dyn SubscriptionPort>) -> Self {
        Self {
            subscriptions,
            lookup_timeout: Self::DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, lookup_timeout: Duration) -> Self {
        self.lookup_timeout = lookup_timeout;
        self
    }

    /// Fails closed: a lookup that does not answer in time counts as denied.
    pub async fn assert_can_trade(&self, user: &UserIdentity) -> Result<()> {
        let allowed = match timeout(self.lookup_timeout, self.subscriptions.can_trade(user.as_str()))
            .await
        {
            Ok(allowed) => allowed,
            Err(_) => {
                tracing::warn!(user = %user, "Subscription lookup timed out, denying");
                false
            }
        };

        if allowed {
            Ok(())
        } else {
            Err(TradingError::SubscriptionRequired {
                user_id: user.to_string(),
                code: StopReasonCode::SubscriptionRequired,
            })
        }
    }
}
