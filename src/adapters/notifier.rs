use async_trait::async_trait;

use crate::ports::Notifier;

/// Notifier that writes to the log
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, text: &str) -> anyhow::Result<()> {
        tracing::info!(target: "tradectl::notify", "{}", text);
        Ok(())
    }
}
