use serde::{Deserialize, Serialize};

/// One entry in a conversation transcript.
///
/// The role is free-form text rather than an enum: transcripts are edited
/// by hand and an operator may label speakers however they like.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn new<R, C>(role: R, content: C) -> Self
    where
        R: Into<String>,
        C: Into<String>,
    {
        Message {
            role: role.into(),
            content: content.into(),
        }
    }

    pub fn user<C: Into<String>>(content: C) -> Self {
        Message::new("user", content)
    }

    pub fn assistant<C: Into<String>>(content: C) -> Self {
        Message::new("assistant", content)
    }
}
