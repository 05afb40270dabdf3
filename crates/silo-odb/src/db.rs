use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use silo_pack::{archive_path, discover_archives, Pack, PackError, PackOptions, PackWriter};
use silo_store::{LooseStore, ObjectStore, StoreError};
use silo_types::{ContentId, Tag};

use crate::error::{OdbError, OdbResult};

const LOOSE_DIR: &str = "loose";
const PACK_DIR: &str = "pack";
const PACK_STAGING_DIR: &str = "pack.new";
const PACK_RETIRED_DIR: &str = "pack.old";

/// Index file name inside the pack directory; archives sit beside it as
/// `pack.000000`, `pack.000001`, and so on.
const PACK_BASE: &str = "pack";

/// Notification fired for maintenance outcomes a caller may want to react
/// to. Routine operations never emit events.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreEvent {
    /// A loose object was deleted because the pack already holds it.
    LoosePruned { id: ContentId },
    /// A repack skipped an object whose stored bytes no longer hash to
    /// its id. The object is absent from the rebuilt pack.
    CorruptSkipped { id: ContentId },
}

type Observer = Box<dyn Fn(&StoreEvent) + Send + Sync>;

/// Unified object database: a loose store for incoming writes and one
/// pack for consolidated history, behind a single lookup surface.
///
/// New objects always land loose; `load`/`stat` fall through to the pack
/// when the loose store misses. The pack is read-mostly and only ever
/// replaced wholesale via [`swap_pack`] or [`repack`].
///
/// On-disk layout under the root:
///
/// ```text
/// <root>/loose/aa/bb/cc…    sharded loose objects
/// <root>/pack/pack          pack index
/// <root>/pack/pack.000000   pack archives
/// ```
///
/// [`swap_pack`]: ObjectDb::swap_pack
/// [`repack`]: ObjectDb::repack
pub struct ObjectDb {
    root: PathBuf,
    opts: PackOptions,
    loose: LooseStore,
    pack: RwLock<Pack>,
    observer: RwLock<Option<Observer>>,
}

impl ObjectDb {
    /// Open (creating if necessary) the database rooted at `root`.
    ///
    /// If a previous pack swap was interrupted, this completes or rolls
    /// it back: a retired pack directory with no live one is restored,
    /// and any stale staging directory is discarded.
    pub fn open(root: impl Into<PathBuf>, opts: PackOptions) -> OdbResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;

        let pack_dir = root.join(PACK_DIR);
        let retired = root.join(PACK_RETIRED_DIR);
        let staging = root.join(PACK_STAGING_DIR);
        if retired.exists() {
            if pack_dir.exists() {
                // Swap finished, cleanup did not.
                fs::remove_dir_all(&retired)?;
            } else {
                // Crashed between the two renames. Roll back.
                fs::rename(&retired, &pack_dir)?;
            }
        }
        if staging.exists() {
            fs::remove_dir_all(&staging)?;
        }

        let loose_dir = root.join(LOOSE_DIR);
        fs::create_dir_all(&loose_dir)?;
        fs::create_dir_all(&pack_dir)?;

        let loose = LooseStore::open(&loose_dir)?;
        let pack = Pack::open(pack_dir.join(PACK_BASE), opts)?;

        Ok(Self {
            root,
            opts,
            loose,
            pack: RwLock::new(pack),
            observer: RwLock::new(None),
        })
    }

    /// Root directory of this database.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Register the callback that receives [`StoreEvent`]s.
    pub fn set_observer(&self, observer: impl Fn(&StoreEvent) + Send + Sync + 'static) {
        *self.observer.write().expect("lock poisoned") = Some(Box::new(observer));
    }

    /// Store an object, returning whether it was newly written and its id.
    ///
    /// Writes always go to the loose store; consolidation into the pack
    /// happens separately via [`repack`](Self::repack).
    pub fn store(&self, tag: Tag, payload: &[u8]) -> OdbResult<(bool, ContentId)> {
        Ok(self.loose.store(tag, payload)?)
    }

    /// Load an object from whichever store holds it.
    pub fn load(&self, id: &ContentId) -> OdbResult<(Tag, Vec<u8>)> {
        if let Some(found) = self.loose.load(id)? {
            return Ok(found);
        }
        let pack = self.pack.read().expect("lock poisoned");
        pack.load(id)?.ok_or(OdbError::NotFound(*id))
    }

    /// Payload size of an object, without reading the payload.
    pub fn stat(&self, id: &ContentId) -> OdbResult<u64> {
        if let Some(size) = self.loose.stat(id)? {
            return Ok(size);
        }
        let pack = self.pack.read().expect("lock poisoned");
        pack.stat(id)?.ok_or(OdbError::NotFound(*id))
    }

    /// Check whether an object exists in either store.
    pub fn contains(&self, id: &ContentId) -> OdbResult<bool> {
        if self.loose.contains(id)? {
            return Ok(true);
        }
        let pack = self.pack.read().expect("lock poisoned");
        Ok(pack.contains(id)?)
    }

    /// Delete a loose object.
    ///
    /// Packed objects cannot be deleted individually; attempting to
    /// fails with [`OdbError::ObjectPacked`] and the object stays until
    /// the next [`repack`](Self::repack) omits it.
    pub fn remove(&self, id: &ContentId) -> OdbResult<()> {
        if self.loose.remove(id)? {
            return Ok(());
        }
        let pack = self.pack.read().expect("lock poisoned");
        if pack.contains(id)? {
            return Err(OdbError::ObjectPacked(*id));
        }
        Err(OdbError::NotFound(*id))
    }

    /// Resolve a hex abbreviation across both stores.
    ///
    /// The prefix must identify one object overall: if the loose store
    /// and the pack resolve it to different ids, that is ambiguity even
    /// though each store on its own was unambiguous.
    pub fn deabbreviate(&self, prefix: &str) -> OdbResult<ContentId> {
        let loose_hit = match self.loose.deabbreviate(prefix) {
            Ok(hit) => hit,
            Err(StoreError::AmbiguousPrefix(p)) => return Err(OdbError::AmbiguousPrefix(p)),
            Err(e) => return Err(e.into()),
        };
        let packed_hit = {
            let pack = self.pack.read().expect("lock poisoned");
            match pack.deabbreviate(prefix) {
                Ok(hit) => hit,
                Err(PackError::AmbiguousPrefix(p)) => return Err(OdbError::AmbiguousPrefix(p)),
                Err(e) => return Err(e.into()),
            }
        };
        match (loose_hit, packed_hit) {
            (Some(a), Some(b)) if a != b => Err(OdbError::AmbiguousPrefix(prefix.to_string())),
            (Some(a), _) => Ok(a),
            (None, Some(b)) => Ok(b),
            (None, None) => Err(OdbError::UnknownPrefix(prefix.to_string())),
        }
    }

    /// Invoke `visit` with every stored id, loose objects first.
    ///
    /// An object resident in both stores is visited twice; callers
    /// needing set semantics deduplicate.
    pub fn list(&self, visit: &mut dyn FnMut(ContentId)) -> OdbResult<()> {
        self.loose.list(visit)?;
        let pack = self.pack.read().expect("lock poisoned");
        Ok(pack.list(visit)?)
    }

    /// Replace the current pack with the one at `new_base`.
    ///
    /// Every file of the new pack (index plus numbered archives) is first
    /// staged into a sibling directory under its canonical name, moved
    /// when `keep` is false (copying across filesystems if rename fails)
    /// or copied when `keep` is true. The live pack directory is then
    /// swapped out with two renames, so a crash at any point leaves
    /// either the old pack or the new one fully installed, never neither.
    pub fn swap_pack(&self, new_base: &Path, keep: bool) -> OdbResult<()> {
        let staging = self.root.join(PACK_STAGING_DIR);
        if staging.exists() {
            fs::remove_dir_all(&staging)?;
        }
        fs::create_dir_all(&staging)?;

        let staged_base = staging.join(PACK_BASE);
        install_file(new_base, &staged_base, keep)?;
        for (id, path) in discover_archives(new_base)? {
            install_file(&path, &archive_path(&staged_base, id), keep)?;
        }

        let mut pack = self.pack.write().expect("lock poisoned");
        let pack_dir = self.root.join(PACK_DIR);
        let retired = self.root.join(PACK_RETIRED_DIR);
        fs::rename(&pack_dir, &retired)?;
        fs::rename(&staging, &pack_dir)?;
        *pack = Pack::open(pack_dir.join(PACK_BASE), self.opts)?;
        if let Err(e) = fs::remove_dir_all(&retired) {
            tracing::warn!(error = %e, "could not remove retired pack files");
        }
        Ok(())
    }

    /// Rebuild the pack from `reachable` objects only, then install it.
    ///
    /// Objects are pulled from either store; anything not listed is
    /// dropped from the packed representation (loose copies are
    /// untouched, see [`prune_loose`](Self::prune_loose)). A reachable
    /// object whose bytes fail hash verification is skipped with a
    /// [`StoreEvent::CorruptSkipped`] event rather than aborting the
    /// whole rebuild. Returns the number of objects packed.
    pub fn repack(&self, reachable: &[ContentId]) -> OdbResult<u64> {
        let staging = tempfile::tempdir_in(&self.root)?;
        let mut writer = PackWriter::new(staging.path().join(PACK_BASE), self.opts)?;
        for id in reachable {
            let (tag, payload) = match self.load(id) {
                Ok(found) => found,
                Err(OdbError::Store(StoreError::Corrupt { .. }))
                | Err(OdbError::Pack(PackError::ObjectCorrupted { .. })) => {
                    self.emit(StoreEvent::CorruptSkipped { id: *id });
                    continue;
                }
                Err(e) => return Err(e),
            };
            writer.store(tag, &payload)?;
        }
        let summary = writer.close()?;
        let packed = summary.object_count;
        self.swap_pack(&summary.base, false)?;
        Ok(packed)
    }

    /// Delete loose objects the pack already holds. Returns how many
    /// were pruned; each fires [`StoreEvent::LoosePruned`].
    pub fn prune_loose(&self) -> OdbResult<u64> {
        let mut loose_ids = Vec::new();
        self.loose.list(&mut |id| loose_ids.push(id))?;

        let mut pruned = 0;
        let pack = self.pack.read().expect("lock poisoned");
        for id in loose_ids {
            if pack.contains(&id)? && self.loose.remove(&id)? {
                pruned += 1;
                self.emit(StoreEvent::LoosePruned { id });
            }
        }
        Ok(pruned)
    }

    fn emit(&self, event: StoreEvent) {
        if let Some(observer) = self.observer.read().expect("lock poisoned").as_ref() {
            observer(&event);
        }
    }
}

/// Move or copy one pack file into place.
fn install_file(src: &Path, dst: &Path, keep: bool) -> io::Result<()> {
    if keep {
        fs::copy(src, dst)?;
        return Ok(());
    }
    if fs::rename(src, dst).is_ok() {
        return Ok(());
    }
    // Rename fails across filesystems; fall back to copy plus delete.
    fs::copy(src, dst)?;
    fs::remove_file(src)
}
