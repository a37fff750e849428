//! The two on-disk index partitions: chat messages and wiki content.
//!
//! Each partition owns its schema, a single shared writer, and a manually
//! reloaded reader. Ingestion upserts by stable document id (delete then
//! add), commits, and reloads the reader, so documents are searchable the
//! moment an upsert call returns.

use std::path::Path;

use parking_lot::Mutex;
use tantivy::collector::{Count, TopDocs};
use tantivy::directory::MmapDirectory;
use tantivy::query::{BooleanQuery, Occur, Query, QueryParser, TermQuery};
use tantivy::schema::{Field, INDEXED, IndexRecordOption, STORED, STRING, Schema, TEXT, Value};
use tantivy::snippet::SnippetGenerator;
use tantivy::{Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument, Term, doc};
use wl_core::{ContentDoc, DocType, MessageDoc};

use crate::error::SearchResult;
use crate::highlight;

const WRITER_BUDGET_BYTES: usize = 50_000_000;
const SNIPPET_MAX_CHARS: usize = 100;

#[derive(Debug, Clone)]
pub struct MessageHit {
    pub doc: MessageDoc,
    pub snippet: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ContentHit {
    pub doc: ContentDoc,
    pub snippet: Option<String>,
}

fn open_index(dir: &Path, schema: Schema) -> SearchResult<(Index, IndexReader, IndexWriter)> {
    std::fs::create_dir_all(dir)?;
    let index = Index::open_or_create(MmapDirectory::open(dir)?, schema)?;
    let reader = index
        .reader_builder()
        .reload_policy(ReloadPolicy::Manual)
        .try_into()?;
    let writer = index.writer(WRITER_BUDGET_BYTES)?;
    Ok((index, reader, writer))
}

/// Slack messages: identifiers as raw keyword fields, body text analyzed.
pub struct MessagePartition {
    index: Index,
    reader: IndexReader,
    writer: Mutex<IndexWriter>,
    doc_id: Field,
    ts: Field,
    client_msg_id: Field,
    user_id: Field,
    team_id: Field,
    channel_id: Field,
    channel_type: Field,
    permalink: Field,
    text: Field,
    raw: Field,
}

impl MessagePartition {
    pub fn open(dir: &Path) -> SearchResult<Self> {
        let mut builder = Schema::builder();
        let doc_id = builder.add_text_field("doc_id", STRING | STORED);
        let ts = builder.add_text_field("ts", STRING);
        let client_msg_id = builder.add_text_field("client_msg_id", STRING);
        let user_id = builder.add_text_field("user_id", STRING);
        let team_id = builder.add_text_field("team_id", STRING);
        let channel_id = builder.add_text_field("channel_id", STRING);
        let channel_type = builder.add_text_field("channel_type", STRING);
        let permalink = builder.add_text_field("permalink", STRING);
        let text = builder.add_text_field("text", TEXT | STORED);
        let raw = builder.add_text_field("raw", STORED);
        let (index, reader, writer) = open_index(dir, builder.build())?;
        Ok(Self {
            index,
            reader,
            writer: Mutex::new(writer),
            doc_id,
            ts,
            client_msg_id,
            user_id,
            team_id,
            channel_id,
            channel_type,
            permalink,
            text,
            raw,
        })
    }

    /// Replace-or-insert each message under its `channel:ts` id, then make
    /// the batch visible to readers.
    pub fn upsert(&self, docs: &[MessageDoc]) -> SearchResult<usize> {
        let mut writer = self.writer.lock();
        for message in docs {
            let id = message.doc_id();
            writer.delete_term(Term::from_field_text(self.doc_id, &id));
            let mut doc = doc!(
                self.doc_id => id,
                self.ts => message.ts.clone(),
                self.user_id => message.user_id.clone(),
                self.channel_id => message.channel_id.clone(),
                self.channel_type => message.channel_type.clone(),
                self.text => message.text.clone().unwrap_or_default(),
                self.raw => serde_json::to_string(message)?
            );
            if let Some(value) = &message.client_msg_id {
                doc.add_text(self.client_msg_id, value);
            }
            if let Some(value) = &message.team_id {
                doc.add_text(self.team_id, value);
            }
            if let Some(value) = &message.permalink {
                doc.add_text(self.permalink, value);
            }
            writer.add_document(doc)?;
        }
        writer.commit()?;
        drop(writer);
        self.reader.reload()?;
        Ok(docs.len())
    }

    pub fn search(&self, query_str: &str, limit: usize) -> SearchResult<Vec<MessageHit>> {
        let searcher = self.reader.searcher();
        let parser = QueryParser::for_index(&self.index, vec![self.text]);
        let query = parser.parse_query(query_str)?;

        let mut snippets = SnippetGenerator::create(&searcher, &*query, self.text)?;
        snippets.set_max_num_chars(SNIPPET_MAX_CHARS);

        let top = searcher.search(&query, &TopDocs::with_limit(limit))?;
        let mut hits = Vec::with_capacity(top.len());
        for (_score, address) in top {
            let stored: TantivyDocument = searcher.doc(address)?;
            let raw = stored
                .get_first(self.raw)
                .and_then(|v| v.as_str())
                .unwrap_or_default();
            let doc: MessageDoc = serde_json::from_str(raw)?;
            let snippet = highlight::render(&snippets.snippet_from_doc(&stored));
            hits.push(MessageHit { doc, snippet });
        }
        Ok(hits)
    }

    pub fn count(&self, query_str: &str) -> SearchResult<u64> {
        let searcher = self.reader.searcher();
        let parser = QueryParser::for_index(&self.index, vec![self.text]);
        let query = parser.parse_query(query_str)?;
        Ok(searcher.search(&query, &Count)? as u64)
    }
}

fn content_type_token(doc_type: DocType) -> &'static str {
    match doc_type {
        DocType::Page => "page",
        DocType::BlogPost => "blogpost",
        DocType::File => "file",
    }
}

/// Confluence pages and blog posts: identifiers, labels, version, and the
/// revision dates as exact-match fields, title and body analyzed.
pub struct ContentPartition {
    index: Index,
    reader: IndexReader,
    writer: Mutex<IndexWriter>,
    doc_id: Field,
    content_id: Field,
    status: Field,
    labels: Field,
    version: Field,
    created: Field,
    updated: Field,
    title: Field,
    body: Field,
    content_type: Field,
    raw: Field,
}

impl ContentPartition {
    pub fn open(dir: &Path) -> SearchResult<Self> {
        let mut builder = Schema::builder();
        let doc_id = builder.add_text_field("doc_id", STRING | STORED);
        let content_id = builder.add_text_field("id", STRING);
        let status = builder.add_text_field("status", STRING);
        let labels = builder.add_text_field("labels", STRING);
        let version = builder.add_u64_field("version", INDEXED);
        let created = builder.add_date_field("created", INDEXED);
        let updated = builder.add_date_field("updated", INDEXED);
        let title = builder.add_text_field("title", TEXT | STORED);
        let body = builder.add_text_field("body", TEXT | STORED);
        let content_type = builder.add_text_field("content_type", STRING);
        let raw = builder.add_text_field("raw", STORED);
        let (index, reader, writer) = open_index(dir, builder.build())?;
        Ok(Self {
            index,
            reader,
            writer: Mutex::new(writer),
            doc_id,
            content_id,
            status,
            labels,
            version,
            created,
            updated,
            title,
            body,
            content_type,
            raw,
        })
    }

    pub fn upsert(&self, docs: &[ContentDoc]) -> SearchResult<usize> {
        let mut writer = self.writer.lock();
        for content in docs {
            let id = content.doc_id();
            writer.delete_term(Term::from_field_text(self.doc_id, &id));
            let mut doc = doc!(
                self.doc_id => id,
                self.content_id => content.id.clone(),
                self.status => content.status.clone(),
                self.version => content.version,
                self.created => tantivy::DateTime::from_timestamp_micros(
                    content.created.timestamp_micros()
                ),
                self.updated => tantivy::DateTime::from_timestamp_micros(
                    content.updated.timestamp_micros()
                ),
                self.title => content.title.clone(),
                self.body => content.body.clone(),
                self.content_type => content.content_type.clone(),
                self.raw => serde_json::to_string(content)?
            );
            for label in &content.labels {
                doc.add_text(self.labels, label);
            }
            writer.add_document(doc)?;
        }
        writer.commit()?;
        drop(writer);
        self.reader.reload()?;
        Ok(docs.len())
    }

    fn build_query(
        &self,
        query_str: &str,
        doc_type: Option<DocType>,
    ) -> SearchResult<Box<dyn Query>> {
        let parser = QueryParser::for_index(&self.index, vec![self.title, self.body]);
        let parsed = parser.parse_query(query_str)?;
        Ok(match doc_type {
            None => parsed,
            Some(doc_type) => {
                let narrow = TermQuery::new(
                    Term::from_field_text(self.content_type, content_type_token(doc_type)),
                    IndexRecordOption::Basic,
                );
                Box::new(BooleanQuery::new(vec![
                    (Occur::Must, parsed),
                    (Occur::Must, Box::new(narrow))
                ]))
            }
        })
    }

    pub fn search(
        &self,
        query_str: &str,
        doc_type: Option<DocType>,
        limit: usize,
    ) -> SearchResult<Vec<ContentHit>> {
        let searcher = self.reader.searcher();
        let query = self.build_query(query_str, doc_type)?;

        let mut title_snippets = SnippetGenerator::create(&searcher, &*query, self.title)?;
        title_snippets.set_max_num_chars(SNIPPET_MAX_CHARS);
        let mut body_snippets = SnippetGenerator::create(&searcher, &*query, self.body)?;
        body_snippets.set_max_num_chars(SNIPPET_MAX_CHARS);

        let top = searcher.search(&query, &TopDocs::with_limit(limit))?;
        let mut hits = Vec::with_capacity(top.len());
        for (_score, address) in top {
            let stored: TantivyDocument = searcher.doc(address)?;
            let raw = stored
                .get_first(self.raw)
                .and_then(|v| v.as_str())
                .unwrap_or_default();
            let doc: ContentDoc = serde_json::from_str(raw)?;

            let fragments: Vec<String> = [
                highlight::render(&title_snippets.snippet_from_doc(&stored)),
                highlight::render(&body_snippets.snippet_from_doc(&stored)),
            ]
            .into_iter()
            .flatten()
            .collect();
            hits.push(ContentHit {
                doc,
                snippet: highlight::join_fragments(&fragments),
            });
        }
        Ok(hits)
    }

    pub fn count(&self, query_str: &str, doc_type: Option<DocType>) -> SearchResult<u64> {
        let searcher = self.reader.searcher();
        let query = self.build_query(query_str, doc_type)?;
        Ok(searcher.search(&query, &Count)? as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use wl_core::{AccountRef, SpaceRef};

    fn message(channel: &str, ts: &str, text: &str) -> MessageDoc {
        MessageDoc {
            ts: ts.to_string(),
            client_msg_id: None,
            text: Some(text.to_string()),
            user_id: "U1".into(),
            team_id: Some("T1".into()),
            channel_id: channel.to_string(),
            channel_type: "channel".into(),
            permalink: None,
        }
    }

    fn content(id: &str, content_type: &str, title: &str, body: &str) -> ContentDoc {
        let by = AccountRef {
            account_id: "acc".into(),
            account_type: "atlassian".into(),
            email: String::new(),
            public_name: "Ada".into(),
            profile_pic_url: String::new(),
        };
        ContentDoc {
            id: id.to_string(),
            content_type: content_type.to_string(),
            status: "current".into(),
            created: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            updated: Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap(),
            title: title.to_string(),
            body: body.to_string(),
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
        }
    }

    #[test]
    fn upsert_is_idempotent_per_doc_id() {
        let dir = tempfile::tempdir().unwrap();
        let partition = MessagePartition::open(dir.path()).unwrap();

        let doc = message("C1", "1700000000.000100", "release the deploy plan");
        partition.upsert(std::slice::from_ref(&doc)).unwrap();
        partition.upsert(std::slice::from_ref(&doc)).unwrap();

        assert_eq!(partition.count("deploy").unwrap(), 1);
    }

    #[test]
    fn upsert_replaces_earlier_version() {
        let dir = tempfile::tempdir().unwrap();
        let partition = MessagePartition::open(dir.path()).unwrap();

        let mut doc = message("C1", "1700000000.000100", "first draft");
        partition.upsert(std::slice::from_ref(&doc)).unwrap();
        doc.text = Some("final wording".into());
        partition.upsert(std::slice::from_ref(&doc)).unwrap();

        assert_eq!(partition.count("draft").unwrap(), 0);
        let hits = partition.search("wording", 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].doc.text.as_deref(), Some("final wording"));
    }

    #[test]
    fn message_snippet_marks_matches() {
        let dir = tempfile::tempdir().unwrap();
        let partition = MessagePartition::open(dir.path()).unwrap();
        partition
            .upsert(&[message("C1", "1700000000.000100", "shipping the deploy today")])
            .unwrap();

        let hits = partition.search("deploy", 10).unwrap();
        assert_eq!(hits[0].snippet.as_deref(), Some("shipping the **deploy** today"));
    }

    #[test]
    fn message_identifiers_support_exact_match() {
        let dir = tempfile::tempdir().unwrap();
        let partition = MessagePartition::open(dir.path()).unwrap();
        partition
            .upsert(&[message("C1", "1700000000.000100", "keyword lookups")])
            .unwrap();

        assert_eq!(partition.count("channel_id:C1").unwrap(), 1);
        assert_eq!(partition.count("user_id:U1").unwrap(), 1);
        assert_eq!(partition.count("user_id:U2").unwrap(), 0);
        assert_eq!(partition.count("ts:1700000000.000100").unwrap(), 1);
        // Identifier fields are raw, never tokenized, so a fragment of an
        // id does not match.
        assert_eq!(partition.count("ts:1700000000").unwrap(), 0);
    }

    #[test]
    fn content_identifiers_and_labels_support_exact_match() {
        let dir = tempfile::tempdir().unwrap();
        let partition = ContentPartition::open(dir.path()).unwrap();
        let mut doc = content("229377", "page", "Runbook", "incident steps");
        doc.labels = vec!["runbook".into(), "oncall".into()];
        partition.upsert(std::slice::from_ref(&doc)).unwrap();

        assert_eq!(partition.count("id:229377", None).unwrap(), 1);
        assert_eq!(partition.count("status:current", None).unwrap(), 1);
        assert_eq!(partition.count("labels:oncall", None).unwrap(), 1);
        assert_eq!(partition.count("labels:offcall", None).unwrap(), 0);
    }

    #[test]
    fn content_doc_type_narrowing() {
        let dir = tempfile::tempdir().unwrap();
        let partition = ContentPartition::open(dir.path()).unwrap();
        partition
            .upsert(&[
                content("1", "page", "Runbook", "incident runbook steps"),
                content("2", "blogpost", "Retro", "incident retrospective notes"),
            ])
            .unwrap();

        assert_eq!(partition.count("incident", None).unwrap(), 2);
        assert_eq!(partition.count("incident", Some(DocType::Page)).unwrap(), 1);

        let hits = partition
            .search("incident", Some(DocType::BlogPost), 10)
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].doc.id, "2");
    }

    #[test]
    fn content_snippet_stitches_title_and_body() {
        let dir = tempfile::tempdir().unwrap();
        let partition = ContentPartition::open(dir.path()).unwrap();
        partition
            .upsert(&[content("1", "page", "Deploy guide", "how we deploy services")])
            .unwrap();

        let hits = partition.search("deploy", None, 10).unwrap();
        assert_eq!(
            hits[0].snippet.as_deref(),
            Some("**Deploy** guide…how we **deploy** services")
        );
    }
}
