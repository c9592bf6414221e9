//! Text serialization of a conversation.
//!
//! A transcript is the program's whole input and output surface: a human
//! can edit the emitted text, append a message, and feed it back in. The
//! codec is therefore tolerant on decode (any text decodes to something)
//! and makes no attempt to escape separators on encode. The round trip is
//! intentionally one-sided: decode(encode(m)) == m only while no content
//! contains the message separator.

use crate::models::message::Message;

pub const DEFAULT_ROLE_SEPARATOR: &str = ">\n";
pub const DEFAULT_MESSAGE_SEPARATOR: &str = "\n---\n";

/// Encodes and decodes conversations using a pair of separator strings.
#[derive(Debug, Clone)]
pub struct Transcript {
    role_separator: String,
    message_separator: String,
}

impl Default for Transcript {
    fn default() -> Self {
        Transcript::new(DEFAULT_ROLE_SEPARATOR, DEFAULT_MESSAGE_SEPARATOR)
    }
}

impl Transcript {
    pub fn new<R, M>(role_separator: R, message_separator: M) -> Self
    where
        R: Into<String>,
        M: Into<String>,
    {
        Transcript {
            role_separator: role_separator.into(),
            message_separator: message_separator.into(),
        }
    }

    /// Join messages as `role + role_separator + content` blocks.
    pub fn encode(&self, messages: &[Message]) -> String {
        messages
            .iter()
            .map(|message| format!("{}{}{}", message.role, self.role_separator, message.content))
            .collect::<Vec<_>>()
            .join(&self.message_separator)
    }

    /// Split text back into messages.
    ///
    /// Each segment is split on the first occurrence of the role
    /// separator; a segment without one becomes a "user" message.
    pub fn decode(&self, text: &str) -> Vec<Message> {
        if text.trim().is_empty() {
            return Vec::new();
        }
        text.split(&self.message_separator)
            .map(|segment| {
                let segment = segment.trim();
                match segment.split_once(&self.role_separator) {
                    Some((role, content)) => Message::new(role, content),
                    None => Message::user(segment),
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_empty_and_whitespace() {
        let transcript = Transcript::default();
        assert_eq!(transcript.decode(""), Vec::new());
        assert_eq!(transcript.decode("   \n\t  "), Vec::new());
    }

    #[test]
    fn test_encode_empty() {
        let transcript = Transcript::default();
        assert_eq!(transcript.encode(&[]), "");
    }

    #[test]
    fn test_decode_defaults_role_to_user() {
        let transcript = Transcript::default();
        assert_eq!(
            transcript.decode("just text"),
            vec![Message::user("just text")]
        );
    }

    #[test]
    fn test_decode_default_separators() {
        let transcript = Transcript::default();
        let messages = transcript.decode("alice>\nhi there\n---\nbob>\nhello");
        assert_eq!(
            messages,
            vec![Message::new("alice", "hi there"), Message::new("bob", "hello")]
        );
    }

    #[test]
    fn test_custom_separators_round_trip() {
        let transcript = Transcript::new(":", "---");
        let messages = transcript.decode("R:C---R2:C2");
        assert_eq!(
            messages,
            vec![Message::new("R", "C"), Message::new("R2", "C2")]
        );
        assert_eq!(transcript.encode(&messages), "R:C---R2:C2");
    }

    #[test]
    fn test_decode_splits_on_first_role_separator_only() {
        let transcript = Transcript::new(":", "---");
        let messages = transcript.decode("narrator:a story: the end");
        assert_eq!(
            messages,
            vec![Message::new("narrator", "a story: the end")]
        );
    }

    #[test]
    fn test_decode_trims_segments() {
        let transcript = Transcript::new(":", "---");
        let messages = transcript.decode("  a:1  ---  b:2  ");
        assert_eq!(messages, vec![Message::new("a", "1"), Message::new("b", "2")]);
    }

    #[test]
    fn test_decode_keeps_empty_trailing_segment() {
        // A transcript ending in a separator has one more, empty, message.
        let transcript = Transcript::default();
        let messages = transcript.decode("user>\nhi\n---\n");
        assert_eq!(messages, vec![Message::new("user", "hi"), Message::user("")]);
    }

    #[test]
    fn test_encode_then_decode_is_stable() {
        let transcript = Transcript::default();
        let messages = vec![
            Message::user("What time is it?"),
            Message::assistant("Half past nine."),
            Message::new("observer", "both of you are wrong"),
        ];
        assert_eq!(transcript.decode(&transcript.encode(&messages)), messages);
    }

    #[test]
    fn test_round_trip_is_not_two_sided() {
        // Content containing the message separator is re-split on decode.
        // This asymmetry is part of the format, not a defect.
        let transcript = Transcript::default();
        let messages = vec![Message::user("a\n---\nb")];
        let decoded = transcript.decode(&transcript.encode(&messages));
        assert_eq!(decoded, vec![Message::user("a"), Message::user("b")]);
    }
}
