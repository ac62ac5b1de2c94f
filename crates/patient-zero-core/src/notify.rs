//! Status and level-up line formatting.
//!
//! Every line is published to both the global status channel and the
//! guild's log channel; sinks without one of those configured drop it.

use patient_zero_types::{Author, ChannelSelector, GuildId};
use tracing::warn;

use crate::collaborators::NotificationSink;

/// Keycap emoji for each decimal digit.
const DIGIT_EMOJI: [&str; 10] = [
    "0\u{fe0f}\u{20e3}",
    "1\u{fe0f}\u{20e3}",
    "2\u{fe0f}\u{20e3}",
    "3\u{fe0f}\u{20e3}",
    "4\u{fe0f}\u{20e3}",
    "5\u{fe0f}\u{20e3}",
    "6\u{fe0f}\u{20e3}",
    "7\u{fe0f}\u{20e3}",
    "8\u{fe0f}\u{20e3}",
    "9\u{fe0f}\u{20e3}",
];

/// Render an author as `name` or `name (nickname)`.
pub fn author_label(author: &Author) -> String {
    match &author.nickname {
        Some(nick) => format!("{} ({nick})", author.name),
        None => author.name.clone(),
    }
}

/// The line announcing that `infector` infected `infectee`.
pub fn status_line(infector: &Author, infectee: &Author, guild_name: &str) -> String {
    format!(
        "{} infected {} in '{guild_name}'.",
        author_label(infector),
        author_label(infectee)
    )
}

/// The line announcing that `name` reached `level`.
pub fn level_up_line(name: &str, level: u32) -> String {
    format!("{name} is now level {}!", emoji_digits(level))
}

/// Render a number with one keycap emoji per digit.
pub fn emoji_digits(value: u32) -> String {
    value
        .to_string()
        .chars()
        .filter_map(|c| c.to_digit(10))
        .filter_map(|d| usize::try_from(d).ok())
        .filter_map(|d| DIGIT_EMOJI.get(d).copied())
        .collect()
}

/// Publish `text` to the global status channel and the guild's log.
///
/// Returns the failures, if any. A failure on one target does not stop the
/// other.
pub async fn publish_everywhere(
    sink: &dyn NotificationSink,
    guild: GuildId,
    text: &str,
) -> Vec<String> {
    let mut failures = Vec::new();
    for target in [ChannelSelector::GlobalStatus, ChannelSelector::GuildLog(guild)] {
        if let Err(e) = sink.publish(target, text).await {
            warn!(target = ?target, error = %e, "failed to publish notification");
            failures.push(e.to_string());
        }
    }
    failures
}

#[cfg(test)]
mod tests {
    use patient_zero_types::ParticipantId;

    use super::*;

    #[test]
    fn status_line_without_nicknames() {
        let a = Author::new(ParticipantId::new(1), "alice");
        let b = Author::new(ParticipantId::new(2), "bob");
        assert_eq!(status_line(&a, &b, "Lobby"), "alice infected bob in 'Lobby'.");
    }

    #[test]
    fn status_line_with_nicknames() {
        let a = Author::new(ParticipantId::new(1), "alice").with_nickname("Al");
        let b = Author::new(ParticipantId::new(2), "bob").with_nickname("B");
        assert_eq!(
            status_line(&a, &b, "Lobby"),
            "alice (Al) infected bob (B) in 'Lobby'."
        );
    }

    #[test]
    fn digits_render_as_keycaps() {
        assert_eq!(emoji_digits(0), "0\u{fe0f}\u{20e3}");
        assert_eq!(emoji_digits(42), "4\u{fe0f}\u{20e3}2\u{fe0f}\u{20e3}");
    }

    #[test]
    fn level_up_line_mentions_name() {
        let line = level_up_line("carol", 7);
        assert_eq!(line, "carol is now level 7\u{fe0f}\u{20e3}!");
    }
}
