/// Host integration: directory enumeration and hard-link queries.
pub mod links;
pub mod metadata;

pub use links::{system_link_query, LinkQuery, NoLinks};
pub use metadata::{EntryMetadata, FsMetadataSource, MetadataSource};
