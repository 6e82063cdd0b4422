use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{Context as _, Result};
use sha2::{Digest as _, Sha384};

use crate::model::Model;

/// Bootloader handle consumed during install. Implementations live with
/// the bootloader stack; this crate only needs the asset name lists.
pub trait Bootloader: Send + Sync {
    fn name(&self) -> &str;

    /// Assets (paths relative to the boot volume content) whose content
    /// hashes feed measured-boot sealing.
    fn trusted_assets(&self) -> Vec<String>;

    /// Assets the bootloader manages itself; the installer must leave
    /// them alone.
    fn managed_assets(&self) -> Vec<String>;
}

/// What the gadget content writer should do with one file it is about
/// to place on a boot volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Apply,
    Ignore,
}

#[derive(Clone)]
struct TrackedAsset {
    file_name: String,
    digest: String,
    content: Vec<u8>,
}

/// Observes gadget content writes on boot volumes: preserves managed
/// bootloader assets and accumulates content hashes of trusted ones for
/// later measured-boot sealing. One instance serves both concerns in a
/// single pass over the gadget content.
pub struct TrustedAssetsObserver {
    bootloader_name: String,
    trusted: BTreeSet<String>,
    managed: BTreeSet<String>,
    tracked: Mutex<BTreeMap<String, TrackedAsset>>,
}

impl TrustedAssetsObserver {
    fn new(bootloader: &dyn Bootloader) -> Self {
        Self {
            bootloader_name: bootloader.name().to_string(),
            trusted: bootloader.trusted_assets().into_iter().collect(),
            managed: bootloader.managed_assets().into_iter().collect(),
            tracked: Mutex::new(BTreeMap::new()),
        }
    }

    /// Called by the gadget content writer for every file landing on a
    /// boot volume, before the write happens. `source` is the staged
    /// file, `relative_target` its destination relative to the volume
    /// content root.
    pub async fn observe_write(&self, source: &Path, relative_target: &Path) -> Result<Decision> {
        let target = relative_target.to_string_lossy().into_owned();

        if self.managed.contains(&target) {
            tracing::debug!(asset = %target, "preserving bootloader managed asset");
            return Ok(Decision::Ignore);
        }

        if self.trusted.contains(&target) {
            let content = tokio::fs::read(source)
                .await
                .with_context(|| format!("cannot observe trusted asset {}", source.display()))?;
            let digest = hex::encode(Sha384::digest(&content));
            let file_name = relative_target
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| target.clone());

            tracing::debug!(asset = %target, %digest, "tracking trusted asset");
            self.tracked.lock().expect("poisoned lock").insert(
                target,
                TrackedAsset {
                    file_name,
                    digest,
                    content,
                },
            );
        }

        Ok(Decision::Apply)
    }

    /// Hashes of all trusted assets observed so far, keyed by asset
    /// path.
    pub fn current_trusted_assets(&self) -> BTreeMap<String, String> {
        self.tracked
            .lock()
            .expect("poisoned lock")
            .iter()
            .map(|(target, asset)| (target.clone(), asset.digest.clone()))
            .collect()
    }

    /// Writes every observed trusted asset into the content-addressed
    /// bootloader asset cache, as `<name>-<digest>` under a directory
    /// named after the bootloader.
    pub async fn flush_asset_cache(&self, cache_dir: &Path) -> Result<()> {
        let tracked: Vec<TrackedAsset> = self
            .tracked
            .lock()
            .expect("poisoned lock")
            .values()
            .cloned()
            .collect();

        if tracked.is_empty() {
            return Ok(());
        }

        let dir = cache_dir.join(&self.bootloader_name);
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("cannot create boot assets cache {}", dir.display()))?;

        for asset in tracked {
            let entry = dir.join(format!("{}-{}", asset.file_name, asset.digest));
            tokio::fs::write(&entry, &asset.content)
                .await
                .with_context(|| format!("cannot cache boot asset {}", entry.display()))?;
        }

        Ok(())
    }
}

/// Builds the content observer(s) for writing gadget content to the
/// target.
///
/// A content observer is returned whenever the bootloader reports
/// trusted or managed assets, regardless of encryption. A trusted-asset
/// observer for later key sealing is returned only when encryption is
/// in use as well, and is then the very same instance: one pass over
/// the gadget content both tracks changes and accumulates trust hashes.
pub fn build_install_observer(
    model: &Model,
    gadget_dir: &Path,
    use_encryption: bool,
    bootloader: &dyn Bootloader,
) -> Result<(
    Option<Arc<TrustedAssetsObserver>>,
    Option<Arc<TrustedAssetsObserver>>,
)> {
    tracing::debug!(
        model = %model.model(),
        gadget_dir = %gadget_dir.display(),
        use_encryption,
        "building install observer"
    );

    if bootloader.trusted_assets().is_empty() && bootloader.managed_assets().is_empty() {
        return Ok((None, None));
    }

    let observer = Arc::new(TrustedAssetsObserver::new(bootloader));
    let trusted_observer = use_encryption.then(|| Arc::clone(&observer));

    Ok((Some(observer), trusted_observer))
}
