use serde::{Deserialize, Serialize};

const UNKNOWN_GROUP_NAME: &str = "Unknown Group";

/// Chat metadata as reported by the transport for a group the account
/// participates in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMetadata {
    pub id: String,
    pub subject: Option<String>,
    pub is_community: bool,
    pub participant_count: usize,
}

/// A dispatch target, decorated with the local archive bit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Recipient {
    pub id: String,
    pub name: String,
    pub is_community: bool,
    pub participant_count: usize,
    pub archived: bool,
}

impl Recipient {
    pub fn from_metadata(meta: ChatMetadata, archived: bool) -> Self {
        let name = match meta.subject {
            Some(subject) if !subject.trim().is_empty() => subject,
            _ => UNKNOWN_GROUP_NAME.to_string(),
        };
        Self {
            id: meta.id,
            name,
            is_community: meta.is_community,
            participant_count: meta.participant_count,
            archived,
        }
    }
}
