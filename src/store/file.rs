/// Directory-backed coordination store shared by operator processes
///
/// Layout of the metadata directory:
/// - `meta.json` holds the `ClusterMeta` snapshot, replaced atomically by
///   writing `meta.json.tmp` and renaming it over the old file
/// - `cluster.lock` exists while the cluster lock is held and contains the
///   holder id. The id is written to a staged `cluster.lock.<id>` file first,
///   then hard-linked into place, so the lock never appears half written and
///   only one process wins the link
use async_trait::async_trait;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{ClusterMeta, CoordinationStore};
use crate::error::{MigrateError, MigrateResult};
use crate::models::{GroupId, ServerGroup, Slot, SlotId, SlotStatus};
use crate::utils::generate_id;

const META_FILE: &str = "meta.json";
const META_TMP_FILE: &str = "meta.json.tmp";
const LOCK_FILE: &str = "cluster.lock";

pub struct FileStore {
    dir: PathBuf,
    product: String,
    /// Serializes read-modify-write cycles within this process
    io: Mutex<()>,
}

impl FileStore {
    /// Open (and create if needed) the metadata directory
    pub async fn open<P: AsRef<Path>>(dir: P, product: &str) -> MigrateResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| MigrateError::store("open", format!("{}: {}", dir.display(), e)))?;

        info!(path = %dir.display(), product, "Opened file coordinator");
        Ok(Self {
            dir,
            product: product.to_string(),
            io: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn lock_path(&self) -> PathBuf {
        self.dir.join(LOCK_FILE)
    }

    async fn load_meta(&self) -> MigrateResult<ClusterMeta> {
        let path = self.dir.join(META_FILE);
        match fs::read(&path).await {
            Ok(content) => {
                let meta: ClusterMeta = serde_json::from_slice(&content)
                    .map_err(|e| MigrateError::store("decode metadata", e))?;
                if meta.product != self.product {
                    return Err(MigrateError::store(
                        "load metadata",
                        format!(
                            "{} belongs to product {}, not {}",
                            path.display(),
                            meta.product,
                            self.product
                        ),
                    ));
                }
                Ok(meta)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(ClusterMeta::new(&self.product)),
            Err(e) => Err(MigrateError::store("read metadata", e)),
        }
    }

    async fn save_meta(&self, meta: &ClusterMeta) -> MigrateResult<()> {
        let content =
            serde_json::to_vec_pretty(meta).map_err(|e| MigrateError::store("encode metadata", e))?;

        let tmp = self.dir.join(META_TMP_FILE);
        let mut file = fs::File::create(&tmp)
            .await
            .map_err(|e| MigrateError::store("write metadata", e))?;
        file.write_all(&content)
            .await
            .map_err(|e| MigrateError::store("write metadata", e))?;
        file.sync_all()
            .await
            .map_err(|e| MigrateError::store("write metadata", e))?;
        drop(file);

        fs::rename(&tmp, self.dir.join(META_FILE))
            .await
            .map_err(|e| MigrateError::store("replace metadata", e))
    }

    async fn read<T, F>(&self, f: F) -> MigrateResult<T>
    where
        T: Send,
        F: FnOnce(&ClusterMeta) -> T + Send,
    {
        let _io = self.io.lock().await;
        let meta = self.load_meta().await?;
        Ok(f(&meta))
    }

    /// Load, apply `f`, and persist only if `f` succeeded
    async fn modify<T, F>(&self, f: F) -> MigrateResult<T>
    where
        T: Send,
        F: FnOnce(&mut ClusterMeta) -> MigrateResult<T> + Send,
    {
        let _io = self.io.lock().await;
        let mut meta = self.load_meta().await?;
        let value = f(&mut meta)?;
        self.save_meta(&meta).await?;
        Ok(value)
    }

    /// Write `holder` to `staged` and link it to the lock path
    async fn publish_lock(&self, staged: &Path, holder: &str) -> io::Result<()> {
        let mut file = fs::File::create(staged).await?;
        file.write_all(holder.as_bytes()).await?;
        file.sync_all().await?;
        drop(file);
        fs::hard_link(staged, self.lock_path()).await
    }

    async fn remove_lock_file(&self) -> MigrateResult<()> {
        match fs::remove_file(self.lock_path()).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(MigrateError::store("remove lock", e)),
        }
    }
}

#[async_trait]
impl CoordinationStore for FileStore {
    async fn lock(&self, holder: &str) -> MigrateResult<()> {
        let staged = self
            .dir
            .join(format!("{}.{}", LOCK_FILE, generate_id("staged")));
        let result = self.publish_lock(&staged, holder).await;
        if let Err(e) = fs::remove_file(&staged).await {
            if e.kind() != ErrorKind::NotFound {
                warn!(path = %staged.display(), "Failed to remove staged lock file: {}", e);
            }
        }

        match result {
            Ok(()) => {
                debug!(holder, "Cluster lock file created");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                let existing = self
                    .lock_owner()
                    .await?
                    .unwrap_or_else(|| "unknown".to_string());
                Err(MigrateError::ClusterLocked { holder: existing })
            }
            Err(e) => Err(MigrateError::store("create lock", e)),
        }
    }

    async fn unlock(&self, holder: &str) -> MigrateResult<()> {
        match self.lock_owner().await? {
            None => Ok(()),
            Some(existing) if existing == holder => {
                self.remove_lock_file().await?;
                debug!(holder, "Cluster lock file removed");
                Ok(())
            }
            Some(existing) => Err(MigrateError::store(
                "unlock",
                format!("lock is held by {}, not {}", existing, holder),
            )),
        }
    }

    async fn lock_owner(&self) -> MigrateResult<Option<String>> {
        match fs::read_to_string(self.lock_path()).await {
            Ok(holder) => Ok(Some(holder.trim().to_string())),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(MigrateError::store("read lock", e)),
        }
    }

    async fn force_unlock(&self) -> MigrateResult<Option<String>> {
        let evicted = self.lock_owner().await?;
        self.remove_lock_file().await?;
        if let Some(holder) = &evicted {
            debug!(holder = %holder, "Cluster lock file broken");
        }
        Ok(evicted)
    }

    async fn load_group(&self, id: GroupId) -> MigrateResult<Option<ServerGroup>> {
        self.read(|meta| meta.group(id).cloned()).await
    }

    async fn list_groups(&self) -> MigrateResult<Vec<ServerGroup>> {
        self.read(|meta| meta.list_groups()).await
    }

    async fn update_group(&self, group: &ServerGroup) -> MigrateResult<()> {
        self.modify(|meta| {
            meta.update_group(group);
            Ok(())
        })
        .await
    }

    async fn delete_group(&self, id: GroupId) -> MigrateResult<()> {
        self.modify(|meta| meta.delete_group(id)).await
    }

    async fn get_slot(&self, id: SlotId) -> MigrateResult<Option<Slot>> {
        self.read(|meta| meta.slot(id).cloned()).await
    }

    async fn update_slot(&self, slot: &Slot) -> MigrateResult<()> {
        self.modify(|meta| meta.update_slot(slot)).await
    }

    async fn migrating_slots(&self) -> MigrateResult<Vec<Slot>> {
        self.read(|meta| meta.migrating_slots()).await
    }

    async fn init_slots(&self, slot_num: u32, force: bool) -> MigrateResult<()> {
        self.modify(|meta| meta.init_slots(slot_num, force)).await
    }

    async fn set_slot_range(
        &self,
        from: SlotId,
        to: SlotId,
        group: GroupId,
        status: SlotStatus,
    ) -> MigrateResult<()> {
        self.modify(|meta| meta.set_slot_range(from, to, group, status))
            .await
    }
}
