use std::path::{Path, PathBuf};

use tokio::{fs, io::AsyncWriteExt};

use crate::{node::NodeId, Result};

/// Persists this node's heartbeat so that a restarted node resumes counting
/// where it stopped, instead of looking older than its last gossiped state.
#[derive(Clone, Debug)]
pub struct HeartbeatStore {
    path: PathBuf,
}

impl HeartbeatStore {
    pub fn new(data_dir: impl AsRef<Path>, node_id: &NodeId) -> Self {
        Self {
            path: data_dir.as_ref().join(format!("{}.heartbeat", node_id)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the last stored heartbeat, or `None` on a first start.
    /// Unparseable contents are treated as a first start.
    pub async fn load(&self) -> Result<Option<u64>> {
        match fs::read_to_string(&self.path).await {
            Ok(contents) => match contents.trim().parse() {
                Ok(heartbeat) => Ok(Some(heartbeat)),
                Err(e) => {
                    log::warn!(
                        "Ignoring unreadable heartbeat file {}: {}",
                        self.path.display(),
                        e
                    );
                    Ok(None)
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Durably writes `heartbeat`: the value goes to a temporary file which is synced,
    /// then renamed over the previous one.
    pub async fn store(&self, heartbeat: u64) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("heartbeat.tmp");
        let mut file = fs::File::create(&tmp).await?;
        file.write_all(heartbeat.to_string().as_bytes()).await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}
