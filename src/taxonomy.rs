use crate::error::{Result, TaxonomyError};
use crate::parser;
use dashmap::DashMap;
use log::{debug, info, warn};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Instant;

const MAX_RANKS: usize = 255;

/// Packs an unordered taxid pair into a cache key, smaller id in the high
/// 32 bits, so `(a, b)` and `(b, a)` share a memo slot.
fn pack_pair(a: u32, b: u32) -> u64 {
    if a < b {
        ((a as u64) << 32) | b as u64
    } else {
        ((b as u64) << 32) | a as u64
    }
}

/// An immutable taxonomic hierarchy loaded from NCBI-style dump files.
///
/// The parent map, rank table, merge map, and delete set are frozen after
/// loading; the structure is then shared by reference across query threads.
/// The only post-construction mutation is insertion into the optional LCA
/// cache, which is internally synchronized.
#[derive(Debug, Default)]
pub struct Taxonomy {
    file: PathBuf,
    root: u32,
    max_taxid: u32,

    nodes: HashMap<u32, u32>,
    merge_nodes: HashMap<u32, u32>,
    del_nodes: HashSet<u32>,

    taxid2rankid: HashMap<u32, u8>,
    rank_names: Vec<String>,
    ranks: HashSet<String>,

    has_ranks: bool,
    has_merge_nodes: bool,
    has_del_nodes: bool,

    cache_lca: bool,
    lca_cache: DashMap<u64, u32>,
}

impl Taxonomy {
    /// Loads the parent map from a nodes dump file.
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the nodes file (plain text or gzip)
    /// * `child_col` - 1-based column of the child taxid
    /// * `parent_col` - 1-based column of the parent taxid
    ///
    /// # Returns
    ///
    /// A `Taxonomy` without rank information; `rank()` will panic on it.
    pub fn from_nodes<P: AsRef<Path>>(
        path: P,
        child_col: usize,
        parent_col: usize,
    ) -> Result<Taxonomy> {
        let file = path.as_ref().to_path_buf();
        let start = Instant::now();

        let mut nodes: HashMap<u32, u32> = HashMap::with_capacity(1024);
        let mut root = 0u32;
        let mut max_taxid = 0u32;

        parser::parse_nodes(&file, child_col, parent_col, |(child, parent)| {
            nodes.insert(child, parent);
            if child == parent {
                if root != 0 && root != child {
                    warn!("multiple roots in {:?}: taxid {} replaces {}", file, child, root);
                }
                root = child;
            }
            if child > max_taxid {
                max_taxid = child;
            }
            Ok(())
        })?;

        info!(
            "loaded {} taxa from {:?} in {:?}",
            nodes.len(),
            file,
            start.elapsed()
        );

        Ok(Taxonomy {
            file,
            root,
            max_taxid,
            nodes,
            ..Default::default()
        })
    }

    /// Loads the parent map and rank table from a nodes dump file.
    ///
    /// Ranks are interned into at most 255 distinct entries; one more
    /// distinct rank fails the load with `TooManyRanks`.
    pub fn with_ranks<P: AsRef<Path>>(
        path: P,
        child_col: usize,
        parent_col: usize,
        rank_col: usize,
    ) -> Result<Taxonomy> {
        let file = path.as_ref().to_path_buf();
        let start = Instant::now();

        let mut nodes: HashMap<u32, u32> = HashMap::with_capacity(1024);
        let mut root = 0u32;
        let mut max_taxid = 0u32;

        let mut taxid2rankid: HashMap<u32, u8> = HashMap::with_capacity(1024);
        let mut rank_names: Vec<String> = Vec::with_capacity(64);
        let mut rank2id: HashMap<String, u8> = HashMap::with_capacity(64);
        let mut ranks: HashSet<String> = HashSet::with_capacity(64);

        parser::parse_nodes_with_rank(
            &file,
            child_col,
            parent_col,
            rank_col,
            |(child, parent, rank)| {
                nodes.insert(child, parent);
                if child == parent {
                    if root != 0 && root != child {
                        warn!("multiple roots in {:?}: taxid {} replaces {}", file, child, root);
                    }
                    root = child;
                }
                if child > max_taxid {
                    max_taxid = child;
                }

                let rank_id = match rank2id.get(rank.as_str()) {
                    Some(&id) => id,
                    None => {
                        if rank_names.len() >= MAX_RANKS {
                            return Err(TaxonomyError::TooManyRanks);
                        }
                        let id = rank_names.len() as u8;
                        rank_names.push(rank.clone());
                        rank2id.insert(rank.clone(), id);
                        ranks.insert(rank);
                        id
                    }
                };
                taxid2rankid.insert(child, rank_id);
                Ok(())
            },
        )?;

        info!(
            "loaded {} taxa from {:?} in {:?}",
            nodes.len(),
            file,
            start.elapsed()
        );
        debug!("{} distinct ranks", rank_names.len());

        Ok(Taxonomy {
            file,
            root,
            max_taxid,
            nodes,
            taxid2rankid,
            rank_names,
            ranks,
            has_ranks: true,
            ..Default::default()
        })
    }

    /// Loads `nodes.dmp` as distributed by NCBI: child taxid at column 1,
    /// parent taxid at column 3.
    pub fn from_ncbi<P: AsRef<Path>>(path: P) -> Result<Taxonomy> {
        Taxonomy::from_nodes(path, 1, 3)
    }

    /// Loads `nodes.dmp` as distributed by NCBI, keeping the rank strings
    /// at column 5.
    pub fn with_ranks_from_ncbi<P: AsRef<Path>>(path: P) -> Result<Taxonomy> {
        Taxonomy::with_ranks(path, 1, 3, 5)
    }

    /// Attaches the merge map from a merged dump file.
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the merged file
    /// * `old_col` - 1-based column of the obsolete taxid
    /// * `new_col` - 1-based column of its replacement
    pub fn load_merged_nodes<P: AsRef<Path>>(
        &mut self,
        path: P,
        old_col: usize,
        new_col: usize,
    ) -> Result<()> {
        let path = path.as_ref();
        let mut merged: HashMap<u32, u32> = HashMap::with_capacity(1024);
        parser::parse_merged(path, old_col, new_col, |(old, new)| {
            merged.insert(old, new);
            Ok(())
        })?;

        info!("loaded {} merged nodes from {:?}", merged.len(), path);
        self.merge_nodes = merged;
        self.has_merge_nodes = true;
        Ok(())
    }

    /// Attaches the merge map from `merged.dmp` as distributed by NCBI.
    pub fn load_merged_nodes_from_ncbi<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        self.load_merged_nodes(path, 1, 3)
    }

    /// Attaches the delete set from a delnodes dump file.
    pub fn load_deleted_nodes<P: AsRef<Path>>(&mut self, path: P, col: usize) -> Result<()> {
        let path = path.as_ref();
        let mut deleted: HashSet<u32> = HashSet::with_capacity(1024);
        parser::parse_deleted(path, col, |taxid| {
            deleted.insert(taxid);
            Ok(())
        })?;

        info!("loaded {} deleted nodes from {:?}", deleted.len(), path);
        self.del_nodes = deleted;
        self.has_del_nodes = true;
        Ok(())
    }

    /// Attaches the delete set from `delnodes.dmp` as distributed by NCBI.
    pub fn load_deleted_nodes_from_ncbi<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        self.load_deleted_nodes(path, 1)
    }

    /// Path of the nodes file this taxonomy was loaded from.
    pub fn file(&self) -> &Path {
        &self.file
    }

    /// The taxid whose parent is itself.
    pub fn root(&self) -> u32 {
        self.root
    }

    /// The numerically largest child taxid seen while loading nodes.
    /// Callers use this to size dense per-taxid arrays.
    pub fn max_taxid(&self) -> u32 {
        self.max_taxid
    }

    /// Number of taxa in the parent map.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn parent_of(&self, taxid: u32) -> Option<u32> {
        self.nodes.get(&taxid).copied()
    }

    /// The replacement taxid recorded for an obsolete one, if a merge map
    /// was loaded. Exactly one hop; chains are not followed.
    pub fn is_merged(&self, taxid: u32) -> Option<u32> {
        if !self.has_merge_nodes {
            return None;
        }
        self.merge_nodes.get(&taxid).copied()
    }

    pub fn is_deleted(&self, taxid: u32) -> bool {
        self.has_del_nodes && self.del_nodes.contains(&taxid)
    }

    pub fn has_ranks(&self) -> bool {
        self.has_ranks
    }

    /// Returns the rank of a taxid, or `""` for a taxid not in the store.
    ///
    /// # Panics
    ///
    /// Panics when the taxonomy was built without rank columns; use
    /// `Taxonomy::with_ranks` if ranks are needed.
    pub fn rank(&self, taxid: u32) -> &str {
        if !self.has_ranks {
            panic!("{}", TaxonomyError::RankNotLoaded);
        }
        match self.taxid2rankid.get(&taxid) {
            Some(&id) => &self.rank_names[id as usize],
            None => "",
        }
    }

    /// The set of distinct rank strings seen while loading.
    pub fn ranks(&self) -> &HashSet<String> {
        &self.ranks
    }

    /// Memoize every LCA result from now on. Call before sharing the
    /// taxonomy across threads; concurrent queries then race benignly on
    /// the internally synchronized map.
    pub fn enable_lca_cache(&mut self) {
        self.cache_lca = true;
    }

    /// Resolves the parent of `child`, applying at most one merge-map hop
    /// when `child` itself is not in the parent map. On a successful hop
    /// `child` is rewritten to its replacement.
    fn resolve_parent(&self, child: &mut u32) -> Option<u32> {
        if let Some(&parent) = self.nodes.get(child) {
            return Some(parent);
        }
        if self.has_merge_nodes {
            if let Some(&remap) = self.merge_nodes.get(child) {
                if let Some(&parent) = self.nodes.get(&remap) {
                    *child = remap;
                    return Some(parent);
                }
            }
        }
        None
    }

    fn finish(&self, query: u64, result: u32) -> u32 {
        if self.cache_lca {
            self.lca_cache.insert(query, result);
        }
        result
    }

    /// Returns the Lowest Common Ancestor of two taxids, `0` for unknown.
    ///
    /// `0` is returned when either argument is `0` or when either chain of
    /// ancestors cannot be resolved, even through the merge map. When one
    /// argument is an ancestor of the other, that argument is returned.
    /// Results are deterministic and independent of the cache state.
    pub fn lca(&self, a: u32, b: u32) -> u32 {
        if a == 0 || b == 0 {
            return 0;
        }
        if a == b {
            return a;
        }

        let query = pack_pair(a, b);
        if self.cache_lca {
            if let Some(hit) = self.lca_cache.get(&query) {
                return *hit;
            }
        }

        // Walk a to the root, collecting every ancestor.
        let mut ancestors_a: HashSet<u32> = HashSet::with_capacity(16);
        let mut child = a;
        loop {
            let parent = match self.resolve_parent(&mut child) {
                Some(parent) => parent,
                None => return self.finish(query, 0),
            };
            if parent == child {
                // root
                ancestors_a.insert(parent);
                break;
            }
            if parent == b {
                // b is an ancestor of a
                return self.finish(query, b);
            }
            ancestors_a.insert(parent);
            child = parent;
        }

        // Walk b upward; the first ancestor of a on the way is the LCA.
        let mut child = b;
        loop {
            let parent = match self.resolve_parent(&mut child) {
                Some(parent) => parent,
                None => return self.finish(query, 0),
            };
            if parent == child {
                break;
            }
            if parent == a {
                // a is an ancestor of b
                return self.finish(query, a);
            }
            if ancestors_a.contains(&parent) {
                return self.finish(query, parent);
            }
            child = parent;
        }

        self.finish(query, self.root)
    }

    /// The ordered chain of taxids from the root down to `taxid`.
    ///
    /// A taxid absent from the parent map gets one merge-map hop, in which
    /// case the chain ends at the replacement. Returns `None` when the
    /// chain cannot be resolved.
    pub fn lineage(&self, taxid: u32) -> Option<Vec<u32>> {
        if taxid == 0 {
            return None;
        }
        let mut child = taxid;
        if !self.nodes.contains_key(&child) {
            child = self.is_merged(child)?;
            if !self.nodes.contains_key(&child) {
                return None;
            }
        }

        let mut chain = vec![child];
        loop {
            let parent = self.resolve_parent(&mut child)?;
            if parent == child {
                break;
            }
            chain.push(parent);
            child = parent;
        }
        chain.reverse();
        Some(chain)
    }
}
