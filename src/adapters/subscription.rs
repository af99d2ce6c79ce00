use async_trait::async_trait;
use std::collections::HashSet;

use crate::ports::SubscriptionPort;

/// Fixed allowlist of entitled users; everyone else is denied
#[derive(Debug, Clone, Default)]
pub struct StaticSubscriptions {
    entitled: HashSet<String>,
}

impl StaticSubscriptions {
    pub fn new<I, S>(users: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            entitled: users
                .into_iter()
                .map(|u| u.as_ref().trim().to_string())
                .filter(|u| !u.is_empty())
                .collect(),
        }
    }
}

#[async_trait]
impl SubscriptionPort for StaticSubscriptions {
    async fn can_trade(&self, user_id: &str) -> bool {
        self.entitled.contains(user_id)
    }
}
