use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::document::{ContentDoc, MessageDoc};
use crate::provider::Provider;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocType {
    Page,
    BlogPost,
    File,
}

/// A link to a provider-side resource (channel, user, space member).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceRef {
    pub resource_id: String,
    pub display_name: Option<String>,
    pub deep_link_url: Option<String>,
}

/// A chat message search hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub provider: Provider,
    pub group: Option<ResourceRef>,
    pub author: Option<ResourceRef>,
    pub body_text: Option<String>,
    pub permalink: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

/// A document-shaped search hit (wiki page, blog post, file).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Content {
    pub provider: Provider,
    pub doc_type: Option<DocType>,
    pub title: Option<String>,
    pub body_text: Option<String>,
    pub url: Option<String>,
    pub authors: Vec<ResourceRef>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SearchItem {
    Message(Message),
    Content(Content),
}

/// Per-provider hit count reported alongside the merged items.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchCount {
    pub provider: Provider,
    pub doc_type: Option<DocType>,
    pub count: u64,
}

/// A provider (optionally narrowed to a doc type) requested by a search.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProviderDocType {
    pub provider: Provider,
    pub doc_type: Option<DocType>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse {
    pub items: Vec<SearchItem>,
    pub counts: Vec<SearchCount>,
}

// Slack deep links, see the client-supported slack:// URI scheme.
pub fn slack_channel_url(channel_id: &str, team_id: &str) -> String {
    format!("slack://channel?team={team_id}&id={channel_id}")
}

pub fn slack_user_url(user_id: &str, team_id: &str) -> String {
    format!("slack://user?team={team_id}&id={user_id}")
}

impl Message {
    /// Normalize an indexed Slack message into the search result shape.
    pub fn from_doc(doc: &MessageDoc) -> Self {
        Self {
            provider: Provider::Slack,
            group: Some(ResourceRef {
                resource_id: doc.channel_id.clone(),
                display_name: None,
                deep_link_url: doc
                    .team_id
                    .as_deref()
                    .map(|team| slack_channel_url(&doc.channel_id, team)),
            }),
            author: Some(ResourceRef {
                resource_id: doc.user_id.clone(),
                display_name: None,
                deep_link_url: doc
                    .team_id
                    .as_deref()
                    .map(|team| slack_user_url(&doc.user_id, team)),
            }),
            body_text: doc.text.clone(),
            permalink: doc.permalink.clone(),
            created_at: doc.created_at(),
        }
    }
}

impl Content {
    /// Normalize an indexed Confluence document into the search result shape.
    pub fn from_doc(doc: &ContentDoc) -> Self {
        Self {
            provider: Provider::ConfluenceCloud,
            doc_type: match doc.content_type.as_str() {
                "blogpost" => Some(DocType::BlogPost),
                _ => Some(DocType::Page),
            },
            title: Some(doc.title.clone()),
            body_text: Some(doc.body.clone()),
            url: doc.web_link.clone(),
            authors: vec![ResourceRef {
                resource_id: doc.created_by.account_id.clone(),
                display_name: Some(doc.created_by.public_name.clone()),
                deep_link_url: Some(format!(
                    "{}/people/{}",
                    doc.base_url.trim_end_matches('/'),
                    doc.created_by.account_id
                ))
            }],
            created_at: Some(doc.created),
            updated_at: Some(doc.updated),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{AccountRef, SpaceRef};
    use chrono::TimeZone;

    fn content_doc() -> ContentDoc {
        let by = AccountRef {
            account_id: "acc-1".into(),
            account_type: "atlassian".into(),
            email: "a@b.c".into(),
            public_name: "Ada".into(),
            profile_pic_url: "https://example.net/pic".into(),
        };
        ContentDoc {
            id: "229377".into(),
            content_type: "blogpost".into(),
            status: "current".into(),
            created: Utc.with_ymd_and_hms(2022, 2, 1, 23, 21, 50).unwrap(),
            updated: Utc.with_ymd_and_hms(2022, 2, 3, 10, 0, 0).unwrap(),
            title: "Quarterly plan".into(),
            body: "The plan.".into(),
            base_url: "https://example.atlassian.net/wiki/".into(),
            web_link: Some("https://example.atlassian.net/wiki/spaces/X/pages/229377".into()),
            tiny_link: None,
            labels: vec!["plans".into()],
            version: 3,
            created_by: by.clone(),
            updated_by: by,
            space: SpaceRef {
                id: "S9".into(),
                key: "X".into(),
                name: "Planning".into(),
                space_type: "global".into(),
                web_link: None,
            },
        }
    }

    #[test]
    fn content_normalization_maps_blogpost_and_author_link() {
        let item = Content::from_doc(&content_doc());
        assert_eq!(item.doc_type, Some(DocType::BlogPost));
        assert_eq!(
            item.authors[0].deep_link_url.as_deref(),
            Some("https://example.atlassian.net/wiki/people/acc-1")
        );
    }

    #[test]
    fn message_normalization_builds_deep_links() {
        let doc = MessageDoc {
            ts: "1643586259.871379".into(),
            client_msg_id: None,
            text: Some("hi".into()),
            user_id: "U7".into(),
            team_id: Some("T1".into()),
            channel_id: "C3".into(),
            channel_type: "channel".into(),
            permalink: Some("https://x.slack.com/archives/C3/p1".into()),
        };
        let msg = Message::from_doc(&doc);
        assert_eq!(
            msg.group.as_ref().unwrap().deep_link_url.as_deref(),
            Some("slack://channel?team=T1&id=C3")
        );
        assert_eq!(
            msg.author.as_ref().unwrap().deep_link_url.as_deref(),
            Some("slack://user?team=T1&id=U7")
        );
    }
}
