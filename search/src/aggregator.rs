//! Fan-out search across the index partitions.
//!
//! The aggregator runs one query per requested provider, merges the hits
//! into a single newest-first list, and reports a per-provider hit count.
//! A provider excluded by the caller's filter, or one whose partition query
//! fails, still appears in the counts with a zero so the caller always gets
//! a complete per-provider breakdown.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use wl_core::{
    Content, Message, Provider, ProviderDocType, SearchCount, SearchItem, SearchResponse,
};

use crate::error::SearchResult;
use crate::partitions::{ContentPartition, MessagePartition};

pub struct SearchAggregator {
    messages: Arc<MessagePartition>,
    content: Arc<ContentPartition>,
}

impl SearchAggregator {
    pub fn new(messages: Arc<MessagePartition>, content: Arc<ContentPartition>) -> Self {
        Self { messages, content }
    }

    /// Open both partitions under `index_dir`.
    pub fn open(index_dir: &Path) -> SearchResult<Self> {
        Ok(Self::new(
            Arc::new(MessagePartition::open(&index_dir.join("messages"))?),
            Arc::new(ContentPartition::open(&index_dir.join("content"))?),
        ))
    }

    pub fn messages(&self) -> &Arc<MessagePartition> {
        &self.messages
    }

    pub fn content(&self) -> &Arc<ContentPartition> {
        &self.content
    }

    /// Search every partition the filter allows. `filter: None` means all
    /// providers; an empty filter matches nothing.
    pub fn search(
        &self,
        query: &str,
        filter: Option<&[ProviderDocType]>,
        limit: usize,
    ) -> SearchResponse {
        let default_scope: Vec<ProviderDocType> = Provider::all()
            .iter()
            .map(|&provider| ProviderDocType {
                provider,
                doc_type: None,
            })
            .collect();
        let requested = filter.unwrap_or(&default_scope);

        let mut items: Vec<(Option<DateTime<Utc>>, SearchItem)> = Vec::new();
        let mut counts = Vec::new();

        for provider in Provider::all() {
            let entries: Vec<&ProviderDocType> = requested
                .iter()
                .filter(|e| e.provider == provider)
                .collect();
            if entries.is_empty() {
                counts.push(SearchCount {
                    provider,
                    doc_type: None,
                    count: 0,
                });
                continue;
            }
            for entry in entries {
                match self.query_partition(provider, query, entry, limit, &mut items) {
                    Ok(count) => counts.push(SearchCount {
                        provider,
                        doc_type: entry.doc_type,
                        count,
                    }),
                    Err(error) => {
                        tracing::error!(provider = %provider, %error, "partition query failed");
                        counts.push(SearchCount {
                            provider,
                            doc_type: entry.doc_type,
                            count: 0,
                        });
                    }
                }
            }
        }

        // Newest first, undated hits last.
        items.sort_by(|a, b| b.0.cmp(&a.0));
        items.truncate(limit);

        SearchResponse {
            items: items.into_iter().map(|(_, item)| item).collect(),
            counts,
        }
    }

    fn query_partition(
        &self,
        provider: Provider,
        query: &str,
        entry: &ProviderDocType,
        limit: usize,
        items: &mut Vec<(Option<DateTime<Utc>>, SearchItem)>,
    ) -> SearchResult<u64> {
        match provider {
            Provider::Slack => {
                let count = self.messages.count(query)?;
                for hit in self.messages.search(query, limit)? {
                    let mut message = Message::from_doc(&hit.doc);
                    if hit.snippet.is_some() {
                        message.body_text = hit.snippet;
                    }
                    items.push((message.created_at, SearchItem::Message(message)));
                }
                Ok(count)
            }
            Provider::ConfluenceCloud => {
                let count = self.content.count(query, entry.doc_type)?;
                for hit in self.content.search(query, entry.doc_type, limit)? {
                    let mut content = Content::from_doc(&hit.doc);
                    if hit.snippet.is_some() {
                        content.body_text = hit.snippet;
                    }
                    items.push((content.created_at, SearchItem::Content(content)));
                }
                Ok(count)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use wl_core::{AccountRef, ContentDoc, MessageDoc, SpaceRef};

    fn aggregator() -> (tempfile::TempDir, SearchAggregator) {
        let dir = tempfile::tempdir().unwrap();
        let agg = SearchAggregator::open(dir.path()).unwrap();
        (dir, agg)
    }

    fn seed(agg: &SearchAggregator) {
        agg.messages()
            .upsert(&[MessageDoc {
                ts: "1700000300.000100".into(),
                client_msg_id: None,
                text: Some("deploy window confirmed".into()),
                user_id: "U1".into(),
                team_id: Some("T1".into()),
                channel_id: "C1".into(),
                channel_type: "channel".into(),
                permalink: Some("https://x.slack.com/archives/C1/p1".into()),
            }])
            .unwrap();

        let by = AccountRef {
            account_id: "acc".into(),
            account_type: "atlassian".into(),
            email: String::new(),
            public_name: "Ada".into(),
            profile_pic_url: String::new(),
        };
        agg.content()
            .upsert(&[ContentDoc {
                id: "42".into(),
                content_type: "page".into(),
                status: "current".into(),
                created: Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
                updated: Utc.with_ymd_and_hms(2024, 3, 2, 12, 0, 0).unwrap(),
                title: "Deploy checklist".into(),
                body: "steps for a safe deploy".into(),
                base_url: "https://example.atlassian.net/wiki".into(),
                web_link: None,
                tiny_link: None,
                labels: vec![],
                version: 1,
                created_by: by.clone(),
                updated_by: by,
                space: SpaceRef {
                    id: "S1".into(),
                    key: "ENG".into(),
                    name: "Engineering".into(),
                    space_type: "global".into(),
                    web_link: None,
                },
            }])
            .unwrap();
    }

    #[test]
    fn unfiltered_search_merges_all_partitions() {
        let (_dir, agg) = aggregator();
        seed(&agg);

        let response = agg.search("deploy", None, 10);
        assert_eq!(response.items.len(), 2);
        assert_eq!(response.counts.len(), 2);
        assert!(response.counts.iter().all(|c| c.count == 1));
    }

    #[test]
    fn filter_excludes_partition_but_keeps_zero_count() {
        let (_dir, agg) = aggregator();
        seed(&agg);

        let filter = [ProviderDocType {
            provider: Provider::ConfluenceCloud,
            doc_type: None,
        }];
        let response = agg.search("deploy", Some(&filter), 10);

        assert!(response
            .items
            .iter()
            .all(|item| matches!(item, SearchItem::Content(_))));
        let slack = response
            .counts
            .iter()
            .find(|c| c.provider == Provider::Slack)
            .unwrap();
        assert_eq!(slack.count, 0);
        let confluence = response
            .counts
            .iter()
            .find(|c| c.provider == Provider::ConfluenceCloud)
            .unwrap();
        assert_eq!(confluence.count, 1);
    }

    #[test]
    fn empty_filter_matches_nothing() {
        let (_dir, agg) = aggregator();
        seed(&agg);

        let response = agg.search("deploy", Some(&[]), 10);
        assert!(response.items.is_empty());
        assert!(response.counts.iter().all(|c| c.count == 0));
    }

    #[test]
    fn unparseable_query_degrades_to_zero_counts() {
        let (_dir, agg) = aggregator();
        seed(&agg);

        // Dangling boolean operator fails the query parser in both
        // partitions; the response degrades instead of erroring.
        let response = agg.search("AND", None, 10);
        assert!(response.items.is_empty());
        assert!(response.counts.iter().all(|c| c.count == 0));
    }

    #[test]
    fn snippet_replaces_body_text() {
        let (_dir, agg) = aggregator();
        seed(&agg);

        let response = agg.search("checklist", None, 10);
        let SearchItem::Content(content) = &response.items[0] else {
            panic!("expected a content hit");
        };
        assert_eq!(content.body_text.as_deref(), Some("Deploy **checklist**"));
    }
}
