use serde::{Deserialize, Serialize};

pub const MAGIC: &[u8; 4] = b"CVOL";
pub const FORMAT_VERSION: u16 = 1;
pub const TRAILER_MAGIC: &[u8; 8] = b"CVOLTAIL";
pub const TRAILER_LEN: u64 = 8 + 8; // footer_offset (u64) + TRAILER_MAGIC

/// One entry in a container's footer index: a name, and where its bytes live
/// in the data region that precedes the footer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexRecord {
    pub name: String,
    pub offset: u64,
    pub len: u64,
}

/// The container's footer: every entry's location, plus a hash over all
/// entry names and offsets so a reader can cheaply notice truncation or
/// reordering before trusting the index.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContainerIndex {
    pub records: Vec<IndexRecord>,
    pub root_hash: [u8; 32],
}

impl ContainerIndex {
    pub fn compute_root_hash(&mut self) {
        self.root_hash = self.root_hash_over_records();
    }

    /// Whether `root_hash` matches a freshly computed hash over `records`.
    /// A reader calls this right after parsing the footer, before trusting
    /// any record in it, so a reordered or truncated-but-still-valid-JSON
    /// footer is caught instead of silently served.
    pub fn verify_root_hash(&self) -> bool {
        self.root_hash == self.root_hash_over_records()
    }

    fn root_hash_over_records(&self) -> [u8; 32] {
        let mut hasher = blake3::Hasher::new();
        for record in &self.records {
            hasher.update(record.name.as_bytes());
            hasher.update(&record.offset.to_le_bytes());
            hasher.update(&record.len.to_le_bytes());
        }
        *hasher.finalize().as_bytes()
    }

    pub fn find(&self, name: &str) -> Option<&IndexRecord> {
        self.records.iter().find(|r| r.name == name)
    }
}
