//! The storage manager (§4.7) owns everything a query needs to run: the
//! `Vfs` backend, the shared tile cache, and the per-array bookkeeping
//! (schema, visible-fragment snapshot). It is the only way client code
//! obtains a `Query` — constructing one snapshots the currently-visible
//! fragment list at that instant, so a long-running read never sees
//! fragments committed after it started (§5's ordering guarantee).
//!
//! Plays the role the teacher library's top-level `read`/`write` free
//! functions play for a single EXR file, generalized to a *set* of
//! immutable fragment directories instead of one file.

use std::sync::Arc;

use dashmap::DashMap;

use crate::cache::TileCache;
use crate::error::{Error, Result};
use crate::fragment::{self, FragmentId, FragmentMetadata, FragmentWriter};
use crate::math::Subarray;
use crate::query::{ReadLayout, ReadQuery, WriteLayout, WriteQuery};
use crate::schema::Schema;
use crate::vfs::Vfs;

const STAGING_PREFIX: &str = "__writing_";
const ARRAY_METADATA_FILE: &str = "__array_metadata.tdb";

/// Tunables for a `StorageManager` instance (§5, §6.4).
#[derive(Debug, Clone)]
pub struct StorageManagerConfig {
    /// Byte budget for the shared `TileCache`.
    pub tile_cache_bytes: usize,

    /// Chunk size new fragment writers compress tiles with (§4.1).
    pub chunk_size: usize,

    /// Identifies this process in generated fragment names (§3).
    pub host_id: String,
}

impl Default for StorageManagerConfig {
    fn default() -> Self {
        Self {
            tile_cache_bytes: 64 * 1024 * 1024,
            chunk_size: crate::codec::DEFAULT_CHUNK_SIZE,
            host_id: "localhost".to_string(),
        }
    }
}

/// One fragment as of the last `refresh`: its identity, directory, and
/// parsed footer. Cheap to clone — the metadata is shared.
#[derive(Debug, Clone)]
pub struct VisibleFragment {
    pub id: FragmentId,
    pub dir: String,
    pub metadata: Arc<FragmentMetadata>,
}

struct ArrayState {
    schema: Arc<Schema>,
    fragments: Vec<VisibleFragment>,
}

/// Owns a `Vfs`, a shared `TileCache`, and the open arrays' schemas and
/// fragment snapshots. Cheap to share: every method takes `&self`, and the
/// per-array table is a `DashMap` so concurrent queries against different
/// arrays never contend.
pub struct StorageManager {
    vfs: Arc<dyn Vfs>,
    config: StorageManagerConfig,
    cache: Arc<TileCache>,
    arrays: DashMap<String, ArrayState>,
}

impl StorageManager {
    pub fn new(vfs: Arc<dyn Vfs>, config: StorageManagerConfig) -> Self {
        let cache = Arc::new(TileCache::new(config.tile_cache_bytes));
        Self { vfs, config, cache, arrays: DashMap::new() }
    }

    pub fn vfs(&self) -> &Arc<dyn Vfs> { &self.vfs }
    pub fn cache(&self) -> &Arc<TileCache> { &self.cache }
    pub fn config(&self) -> &StorageManagerConfig { &self.config }

    /// Creates a new array directory and writes its schema (§6.4). Fails if
    /// the schema doesn't validate or the directory already exists.
    pub fn create_array(&self, array_uri: &str, schema: Schema) -> Result<()> {
        schema.validate()?;
        self.create_array_unchecked(array_uri, schema)
    }

    /// As `create_array`, but `allowed_reserved` names may appear in
    /// `schema.attributes` without failing validation. Used by the KV
    /// facade (§4.6) to create its own `__key`/`__key_type`-bearing schema.
    pub(crate) fn create_array_with_reserved(&self, array_uri: &str, schema: Schema, allowed_reserved: &[&str]) -> Result<()> {
        schema.validate_allowing(allowed_reserved)?;
        self.create_array_unchecked(array_uri, schema)
    }

    fn create_array_unchecked(&self, array_uri: &str, schema: Schema) -> Result<()> {
        if self.vfs.is_dir(array_uri)? {
            return Err(Error::storage_manager(format!("array '{}' already exists", array_uri)));
        }

        self.vfs.create_dir(array_uri)?;
        let metadata_path = format!("{}/{}", array_uri, ARRAY_METADATA_FILE);
        self.vfs.write(&metadata_path, &schema.write()?, false)?;

        self.arrays.insert(array_uri.to_string(), ArrayState { schema: Arc::new(schema), fragments: Vec::new() });
        Ok(())
    }

    /// Loads (or returns the cached) schema for `array_uri`, then refreshes
    /// its visible-fragment snapshot.
    pub fn open_array(&self, array_uri: &str) -> Result<Arc<Schema>> {
        if !self.arrays.contains_key(array_uri) {
            let metadata_path = format!("{}/{}", array_uri, ARRAY_METADATA_FILE);
            let size = self.vfs.file_size(&metadata_path)?;
            let bytes = self.vfs.read(&metadata_path, 0, size)?;
            let schema = Schema::read(&bytes)?;
            self.arrays.insert(array_uri.to_string(), ArrayState { schema: Arc::new(schema), fragments: Vec::new() });
        }

        self.refresh(array_uri)?;
        Ok(self.arrays.get(array_uri).unwrap().schema.clone())
    }

    pub fn schema(&self, array_uri: &str) -> Result<Arc<Schema>> {
        self.arrays.get(array_uri)
            .map(|state| state.schema.clone())
            .ok_or_else(|| Error::storage_manager(format!("array '{}' is not open", array_uri)))
    }

    /// Re-lists `array_uri`'s fragment directories and re-parses their
    /// footers, replacing the cached snapshot. Staging directories
    /// (`__writing_*`, a write in progress or abandoned mid-crash) are
    /// skipped. No call here happens automatically — a read query sees
    /// exactly the fragments visible as of the last explicit refresh, per
    /// §5's snapshot-at-query-construction rule.
    pub fn refresh(&self, array_uri: &str) -> Result<()> {
        let mut dirs = self.vfs.ls_dirs(array_uri)?;
        dirs.retain(|dir| {
            let basename = dir.rsplit(['/', '\\']).next().unwrap_or(dir);
            !basename.starts_with(STAGING_PREFIX)
        });
        dirs.sort();

        let mut fragments = Vec::with_capacity(dirs.len());
        for dir in dirs {
            let basename = dir.rsplit(['/', '\\']).next().unwrap_or(&dir).to_string();
            let metadata = fragment::read_footer(self.vfs.as_ref(), &dir)?;
            fragments.push(VisibleFragment { id: FragmentId::from_name(basename), dir, metadata: Arc::new(metadata) });
        }

        let mut state = self.arrays.get_mut(array_uri)
            .ok_or_else(|| Error::storage_manager(format!("array '{}' is not open", array_uri)))?;
        state.fragments = fragments;
        Ok(())
    }

    /// The fragment snapshot as of the last `refresh`, oldest first —
    /// the insertion-rank order §4.4's merge loop and §4.4 step 3's
    /// duplicate-coordinate resolution rely on.
    pub fn visible_fragments(&self, array_uri: &str) -> Result<Vec<VisibleFragment>> {
        self.arrays.get(array_uri)
            .map(|state| state.fragments.clone())
            .ok_or_else(|| Error::storage_manager(format!("array '{}' is not open", array_uri)))
    }

    /// Starts a new fragment writer against `array_uri`'s currently open schema.
    pub fn new_fragment_writer(&self, array_uri: &str) -> Result<FragmentWriter> {
        let schema = self.schema(array_uri)?;
        FragmentWriter::create(schema, self.vfs.clone(), array_uri, &self.config.host_id)
    }

    /// Constructs a read query against `array_uri`'s schema and the fragment
    /// snapshot taken at the last `refresh` — this, not `refresh` itself, is
    /// the moment §5's "a query never sees fragments committed after it
    /// started" guarantee is established.
    pub fn new_read_query(
        &self,
        array_uri: &str,
        subarray: Subarray,
        attributes: Vec<String>,
        want_coords: bool,
        layout: ReadLayout,
    ) -> Result<ReadQuery> {
        let schema = self.schema(array_uri)?;
        let fragments = self.visible_fragments(array_uri)?;
        ReadQuery::init(schema, self.vfs.clone(), self.cache.clone(), fragments, subarray, attributes, want_coords, layout)
    }

    /// Constructs a write query against `array_uri`'s currently open schema.
    /// Unlike a read, a write doesn't need the fragment snapshot — it only
    /// ever produces one new fragment, never reads existing ones.
    pub fn new_write_query(
        &self,
        array_uri: &str,
        layout: WriteLayout,
        subarray: Option<Subarray>,
    ) -> Result<WriteQuery> {
        let schema = self.schema(array_uri)?;
        WriteQuery::init(schema, self.vfs.clone(), array_uri.to_string(), self.config.host_id.clone(), layout, subarray)
    }
}
