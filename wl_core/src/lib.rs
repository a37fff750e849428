//! Core domain types shared across the Worklens crates: providers and their
//! credential schemas, the raw per-provider index documents, and the
//! normalized search result model.

pub mod document;
pub mod provider;
pub mod result;

pub use document::{AccountRef, ContentDoc, MessageDoc, SpaceRef};
pub use provider::{CredentialKey, Provider, provider_fields, public_provider_fields};
pub use result::{
    DocType, Message, Content, ProviderDocType, ResourceRef, SearchCount, SearchItem,
    SearchResponse,
};
