//! Asset Types
//!
//! The immutable, content-addressed records the cache moves between tiers.
//! An [`Asset`] is identified by a stable string ID; once inserted into the
//! cache its content never changes (a new version is a new insert).

use bytes::Bytes;
use serde::Serialize;
use uuid::Uuid;

/// An immutable binary asset plus its metadata.
///
/// Assets circulate through the cache as `Arc<Asset>` so the weak tier can
/// hold non-owning handles to them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Asset {
    /// Stable string ID (content-addressed by the upstream service)
    pub id: String,
    /// 16-byte identifier carried alongside the string ID
    pub uuid: Uuid,
    /// Human-readable name
    pub name: String,
    /// Free-form description
    pub description: String,
    /// Asset type discriminant (signed 8-bit, upstream-defined)
    pub kind: i8,
    /// Bit flags (upstream-defined)
    pub flags: u32,
    /// Raw content bytes
    pub data: Bytes,
    /// Created locally rather than fetched from upstream
    pub local: bool,
    /// Not intended to outlive the session
    pub temporary: bool,
}

impl Asset {
    /// Create a minimal asset with the given ID and content.
    pub fn new(id: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            id: id.into(),
            uuid: Uuid::new_v4(),
            name: String::new(),
            description: String::new(),
            kind: 0,
            flags: 0,
            data: data.into(),
            local: false,
            temporary: false,
        }
    }

    /// Create an asset whose string ID is its UUID rendering.
    pub fn with_uuid(uuid: Uuid, data: impl Into<Bytes>) -> Self {
        let mut asset = Self::new(uuid.to_string(), data);
        asset.uuid = uuid;
        asset
    }

    /// Content size in bytes
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Metadata view without the content bytes
    pub fn metadata(&self) -> AssetMetadata {
        AssetMetadata {
            id: self.id.clone(),
            uuid: self.uuid,
            name: self.name.clone(),
            description: self.description.clone(),
            kind: self.kind,
            flags: self.flags,
            size: self.data.len() as u64,
            local: self.local,
            temporary: self.temporary,
        }
    }
}

/// Metadata-only view of an asset, for callers that do not need the bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssetMetadata {
    pub id: String,
    pub uuid: Uuid,
    pub name: String,
    pub description: String,
    pub kind: i8,
    pub flags: u32,
    pub size: u64,
    pub local: bool,
    pub temporary: bool,
}

/// Check whether an ID is usable as a cache key.
///
/// Blank/whitespace IDs and the all-zero UUID rendering are rejected
/// before any tier is consulted.
pub fn is_valid_id(id: &str) -> bool {
    if id.trim().is_empty() {
        return false;
    }
    match Uuid::try_parse(id) {
        Ok(uuid) => !uuid.is_nil(),
        Err(_) => true,
    }
}

// =============================================================================
// Tests
// =============================================================================
