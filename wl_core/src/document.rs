use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// One Slack message as stored in the messages partition.
///
/// `channel_id:ts` is unique per Slack's message addressing, which is what
/// makes re-ingestion of the same message an idempotent replace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageDoc {
    pub ts: String,
    pub client_msg_id: Option<String>,
    pub text: Option<String>,
    pub user_id: String,
    pub team_id: Option<String>,
    pub channel_id: String,
    pub channel_type: String,
    pub permalink: Option<String>,
}

impl MessageDoc {
    pub fn doc_id(&self) -> String {
        format!("{}:{}", self.channel_id, self.ts)
    }

    /// Slack `ts` values are epoch seconds with a fractional suffix.
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        let secs: f64 = self.ts.parse().ok()?;
        Utc.timestamp_millis_opt((secs * 1000.0) as i64).single()
    }
}

/// A Confluence user reference denormalized onto a content document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountRef {
    pub account_id: String,
    pub account_type: String,
    pub email: String,
    pub public_name: String,
    pub profile_pic_url: String,
}

/// The space a content document lives in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpaceRef {
    pub id: String,
    pub key: String,
    pub name: String,
    pub space_type: String,
    pub web_link: Option<String>,
}

/// One Confluence page or blog post as stored in the content partition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentDoc {
    pub id: String,
    pub content_type: String,
    pub status: String,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    pub title: String,
    pub body: String,
    pub base_url: String,
    pub web_link: Option<String>,
    pub tiny_link: Option<String>,
    pub labels: Vec<String>,
    pub version: u64,
    pub created_by: AccountRef,
    pub updated_by: AccountRef,
    pub space: SpaceRef,
}

impl ContentDoc {
    /// Space + content id is unique within a Confluence site.
    pub fn doc_id(&self) -> String {
        format!("{}:{}", self.space.id, self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_doc_id_is_channel_and_ts() {
        let doc = MessageDoc {
            ts: "1643586259.871379".into(),
            client_msg_id: None,
            text: Some("hello".into()),
            user_id: "U1".into(),
            team_id: None,
            channel_id: "C42".into(),
            channel_type: "channel".into(),
            permalink: None,
        };
        assert_eq!(doc.doc_id(), "C42:1643586259.871379");
        let created = doc.created_at().unwrap();
        assert_eq!(created.timestamp(), 1643586259);
    }

    #[test]
    fn message_created_at_rejects_garbage_ts() {
        let doc = MessageDoc {
            ts: "not-a-ts".into(),
            client_msg_id: None,
            text: None,
            user_id: "U1".into(),
            team_id: None,
            channel_id: "C1".into(),
            channel_type: "channel".into(),
            permalink: None,
        };
        assert!(doc.created_at().is_none());
    }
}
