//! Commit kinds encoded in the message subject.
//!
//! A `[prepare]` commit records bookkeeping only (e.g. a turn that changed
//! nothing but the session record); everything else is a standalone major
//! commit. The folding rules live in [`crate::GitBackend::commit_tree`].

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommitKind {
    Major,
    Prepare,
}

const PREPARE_PREFIX: &str = "[prepare] ";

/// Render a commit message with its kind prefix. Major commits carry none.
pub fn format_commit_message(kind: CommitKind, message: &str) -> String {
    match kind {
        CommitKind::Major => message.to_string(),
        CommitKind::Prepare => format!("{PREPARE_PREFIX}{message}"),
    }
}

/// Split a stored commit message into its kind and bare text.
pub fn parse_commit_kind(message: &str) -> (CommitKind, &str) {
    match message.strip_prefix(PREPARE_PREFIX) {
        Some(rest) => (CommitKind::Prepare, rest),
        None => (CommitKind::Major, message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_every_kind() {
        for kind in [CommitKind::Major, CommitKind::Prepare] {
            let rendered = format_commit_message(kind, "tidy session state");
            let (parsed, rest) = parse_commit_kind(&rendered);
            assert_eq!(parsed, kind);
            assert_eq!(rest, "tidy session state");
        }
    }

    #[test]
    fn unprefixed_message_is_major() {
        let (kind, rest) = parse_commit_kind("feat: add retry budget");
        assert_eq!(kind, CommitKind::Major);
        assert_eq!(rest, "feat: add retry budget");
    }
}
