use std::collections::{BTreeMap, HashMap};

use futures::future::BoxFuture;
use futures::stream::{self, BoxStream};
use globset::{Glob, GlobSetBuilder};
use tracing::instrument;

use common::{
    Block, BlockRequest, Blockset, BlocksetEntry, CatalogFile, ContentHash, FileMetadata,
    FilePlan, Fileset, RemoteVolume,
};

use crate::error::CatalogError;
use crate::{Catalog, FilePlanItem, RestoreRequest};

/// Reference [`Catalog`] implementation backed by `BTreeMap`s, sorted for
/// deterministic ordering the way a real SQL backend's `ORDER BY` would
/// be. Not a SQL engine — schema migrations and the write-path's own
/// tables are deliberately not modeled (see module docs).
#[derive(Default)]
pub struct MemCatalog {
    volumes: BTreeMap<u64, RemoteVolume>,
    blocks: BTreeMap<u64, Block>,
    blocks_by_hash: HashMap<ContentHash, Vec<u64>>,
    files: BTreeMap<u64, CatalogFile>,
    blocksets: BTreeMap<u64, Blockset>,
    blockset_entries: BTreeMap<u64, Vec<BlocksetEntry>>,
    file_metadata: BTreeMap<u64, FileMetadata>,
    filesets: BTreeMap<u64, Fileset>,
    fileset_entries: BTreeMap<u64, Vec<u64>>,
}

impl MemCatalog {
    pub fn builder() -> MemCatalogBuilder {
        MemCatalogBuilder::default()
    }

    fn filesets_newest_first(&self) -> Vec<&Fileset> {
        let mut filesets: Vec<&Fileset> = self.filesets.values().collect();
        filesets.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        filesets
    }

    fn select_fileset(&self, request: &RestoreRequest) -> Result<&Fileset, CatalogError> {
        let ordered = self.filesets_newest_first();
        if let Some(at_time) = request.at_time {
            return ordered
                .into_iter()
                .find(|fs| fs.timestamp <= at_time)
                .ok_or(CatalogError::NoSuchFileset);
        }
        let index = request.version.unwrap_or(0) as usize;
        ordered.into_iter().nth(index).ok_or(CatalogError::NoSuchFileset)
    }

    fn build_glob_filter(patterns: &[String]) -> Result<Option<globset::GlobSet>, CatalogError> {
        if patterns.is_empty() {
            return Ok(None);
        }
        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            let glob = Glob::new(pattern).map_err(|e| CatalogError::InvalidGlob {
                pattern: pattern.clone(),
                reason: e.to_string(),
            })?;
            builder.add(glob);
        }
        let set = builder
            .build()
            .map_err(|e| CatalogError::InvalidGlob {
                pattern: patterns.join(","),
                reason: e.to_string(),
            })?;
        Ok(Some(set))
    }

    /// Find every `(volume, block)` row matching `hash`, in no particular
    /// order; [`resolve_restorable_block`] applies the tie-break.
    fn candidates_for_hash(&self, hash: &ContentHash) -> Vec<(RemoteVolume, Block)> {
        self.blocks_by_hash
            .get(hash)
            .into_iter()
            .flatten()
            .filter_map(|block_id| {
                let block = self.blocks.get(block_id)?;
                let volume = self.volumes.get(&block.volume_id)?;
                Some((volume.clone(), *block))
            })
            .collect()
    }

    /// Lowest volume id among `{Verified, Uploaded}` candidates for a
    /// block hash; the duplicate-block tie-break this spec picks.
    fn resolve_restorable_block(
        &self,
        hash: &ContentHash,
    ) -> Result<(RemoteVolume, Block), CatalogError> {
        let mut candidates = self.candidates_for_hash(hash);
        candidates.retain(|(volume, _)| volume.state.is_restorable());
        candidates.sort_by_key(|(volume, _)| volume.id);
        candidates
            .into_iter()
            .next()
            .ok_or_else(|| CatalogError::MissingBlock(*hash))
    }

    fn plan_for_file(&self, file: &CatalogFile) -> Result<(FilePlan, Vec<BlockRequest>), CatalogError> {
        let blockset = self
            .blocksets
            .get(&file.blockset_id)
            .ok_or_else(|| CatalogError::Corrupt(format!("file {} has no blockset row", file.id)))?;

        let mut entries = self
            .blockset_entries
            .get(&file.blockset_id)
            .cloned()
            .unwrap_or_default();
        entries.sort_by_key(|e| e.index);

        let mut requests = Vec::with_capacity(entries.len());
        let mut offset = 0u64;
        for entry in &entries {
            let block = self.blocks.get(&entry.block_id).ok_or_else(|| {
                CatalogError::Corrupt(format!(
                    "blockset {} entry {} references unknown block {}",
                    file.blockset_id, entry.index, entry.block_id
                ))
            })?;
            let (volume, _) = self.resolve_restorable_block(&block.hash)?;
            requests.push(BlockRequest {
                volume_id: volume.id,
                block_id: block.id,
                block_hash: block.hash,
                block_size: block.size,
                file_id: file.id,
                file_offset: offset,
                evict_hint: false,
            });
            offset += block.size as u64;
        }

        let metadata = self
            .file_metadata
            .get(&file.metadata_id)
            .cloned()
            .unwrap_or_default();

        let plan = FilePlan {
            file_id: file.id,
            target_path: file.path.clone(),
            expected_length: blockset.length,
            expected_hash: blockset.fullhash,
            hardlink_target_id: file.hardlink_target_id,
            metadata,
        };
        Ok((plan, requests))
    }
}

/// Marks the final `BlockRequest` touching each volume across the whole
/// plan with `evict_hint = true`, so the Volume Manager can release the
/// volume as soon as that request is satisfied.
fn apply_evict_hints(items: &mut [FilePlanItem]) {
    let mut last_seen: HashMap<u64, (usize, usize)> = HashMap::new();
    for (item_idx, item) in items.iter().enumerate() {
        if let Ok((_, requests)) = item {
            for (req_idx, req) in requests.iter().enumerate() {
                last_seen.insert(req.volume_id, (item_idx, req_idx));
            }
        }
    }
    for (item_idx, req_idx) in last_seen.values() {
        if let Ok((_, requests)) = &mut items[*item_idx] {
            requests[*req_idx].evict_hint = true;
        }
    }
}

impl Catalog for MemCatalog {
    #[instrument(skip(self, request), fields(backup_id = %request.backup_id))]
    fn files_for_restore<'a>(
        &'a self,
        request: &'a RestoreRequest,
    ) -> BoxFuture<'a, Result<BoxStream<'a, FilePlanItem>, CatalogError>> {
        Box::pin(async move {
            let fileset = self.select_fileset(request)?;
            let glob = Self::build_glob_filter(&request.path_globs)?;

            let mut file_ids = self
                .fileset_entries
                .get(&fileset.id)
                .cloned()
                .unwrap_or_default();
            file_ids.sort_unstable();

            let mut items: Vec<FilePlanItem> = Vec::with_capacity(file_ids.len());
            for file_id in file_ids {
                let Some(file) = self.files.get(&file_id) else {
                    items.push(Err(CatalogError::Corrupt(format!(
                        "fileset entry references unknown file {file_id}"
                    ))));
                    continue;
                };
                if let Some(glob) = &glob {
                    if !glob.is_match(&file.path) {
                        continue;
                    }
                }
                items.push(self.plan_for_file(file));
            }

            apply_evict_hints(&mut items);
            Ok(stream::iter(items).boxed())
        })
    }

    #[instrument(skip(self))]
    fn resolve_block<'a>(
        &'a self,
        hash: &'a ContentHash,
    ) -> BoxFuture<'a, Result<Vec<(RemoteVolume, Block)>, CatalogError>> {
        Box::pin(async move { Ok(self.candidates_for_hash(hash)) })
    }

    #[instrument(skip(self))]
    fn get_volume<'a>(&'a self, volume_id: u64) -> BoxFuture<'a, Result<RemoteVolume, CatalogError>> {
        Box::pin(async move {
            self.volumes
                .get(&volume_id)
                .cloned()
                .ok_or_else(|| CatalogError::Corrupt(format!("no such volume {volume_id}")))
        })
    }
}

use futures::StreamExt;

/// Builds a [`MemCatalog`] row by row; the reference way to construct test
/// fixtures and the in-memory catalog used outside tests.
#[derive(Default)]
pub struct MemCatalogBuilder {
    catalog: MemCatalog,
}

impl MemCatalogBuilder {
    pub fn add_volume(mut self, volume: RemoteVolume) -> Self {
        self.catalog.volumes.insert(volume.id, volume);
        self
    }

    pub fn add_block(mut self, block: Block) -> Self {
        self.catalog
            .blocks_by_hash
            .entry(block.hash)
            .or_default()
            .push(block.id);
        self.catalog.blocks.insert(block.id, block);
        self
    }

    pub fn add_blockset(mut self, blockset: Blockset, entries: Vec<BlocksetEntry>) -> Self {
        self.catalog.blockset_entries.insert(blockset.id, entries);
        self.catalog.blocksets.insert(blockset.id, blockset);
        self
    }

    pub fn add_file(mut self, file: CatalogFile) -> Self {
        self.catalog.files.insert(file.id, file);
        self
    }

    pub fn add_file_metadata(mut self, metadata_id: u64, metadata: FileMetadata) -> Self {
        self.catalog.file_metadata.insert(metadata_id, metadata);
        self
    }

    pub fn add_fileset(mut self, fileset: Fileset, file_ids: Vec<u64>) -> Self {
        self.catalog.fileset_entries.insert(fileset.id, file_ids);
        self.catalog.filesets.insert(fileset.id, fileset);
        self
    }

    pub fn build(self) -> MemCatalog {
        self.catalog
    }
}
