//! Notification sink that writes status lines to the log.

use async_trait::async_trait;
use patient_zero_core::{CollaboratorError, NotificationSink};
use patient_zero_types::{ChannelId, ChannelSelector};
use tracing::info;

/// Publishes every status line as a structured log event.
///
/// The global status channel is only "published" to when one is
/// configured; every guild is assumed to have its log channel.
#[derive(Debug, Clone)]
pub struct TracingSink {
    global_channel: Option<ChannelId>,
    log_channel_name: String,
}

impl TracingSink {
    /// Create a sink for the given channel configuration.
    pub const fn new(global_channel: Option<ChannelId>, log_channel_name: String) -> Self {
        Self {
            global_channel,
            log_channel_name,
        }
    }
}

#[async_trait]
impl NotificationSink for TracingSink {
    async fn publish(&self, target: ChannelSelector, text: &str) -> Result<(), CollaboratorError> {
        match target {
            ChannelSelector::GlobalStatus => {
                if let Some(channel) = self.global_channel {
                    info!(target: "patient_zero::status", channel = %channel, "{text}");
                }
            }
            ChannelSelector::GuildLog(guild) => {
                info!(
                    target: "patient_zero::guild_log",
                    guild = %guild,
                    channel = self.log_channel_name.as_str(),
                    "{text}"
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::io;
    use std::sync::{Arc, Mutex, PoisonError};

    use patient_zero_types::GuildId;

    use super::*;

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Captured {
        fn text(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap_or_else(PoisonError::into_inner))
                .into_owned()
        }
    }

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn capture() -> (Captured, tracing::subscriber::DefaultGuard) {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();
        (captured, tracing::subscriber::set_default(subscriber))
    }

    #[tokio::test]
    async fn unconfigured_global_channel_is_skipped() {
        let (captured, _guard) = capture();
        let sink = TracingSink::new(None, String::from("pz-log"));

        sink.publish(ChannelSelector::GlobalStatus, "a infected b in 'Lobby'.")
            .await
            .unwrap();
        assert!(!captured.text().contains("infected b"));
    }

    #[tokio::test]
    async fn status_lines_are_logged_per_target() {
        let (captured, _guard) = capture();
        let sink = TracingSink::new(Some(ChannelId::new(900)), String::from("pz-log"));

        sink.publish(ChannelSelector::GlobalStatus, "global line")
            .await
            .unwrap();
        sink.publish(ChannelSelector::GuildLog(GuildId::new(1)), "guild line")
            .await
            .unwrap();

        let text = captured.text();
        assert!(text.contains("global line"));
        assert!(text.contains("channel=900"));
        assert!(text.contains("guild line"));
        assert!(text.contains("pz-log"));
    }
}
