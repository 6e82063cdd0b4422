use std::collections::BTreeMap;
use std::os::unix::fs::PermissionsExt as _;
use std::path::Path;

use anyhow::{Context as _, Result};
use rand::RngCore as _;

use crate::{
    model::Model, observer::TrustedAssetsObserver, paths::InstallDirs, types::EncryptionKey,
};

/// Length of the pairing marker proving that the data and save
/// partitions belong to the same install.
pub const MARKER_LEN: usize = 32;

/// Durably provisions the outcome of an encrypted install: writes every
/// per-role key to the install-host FDE device directory, generates the
/// pairing marker and stores it on both the data and save partitions,
/// and flushes observed trusted bootloader assets into the asset cache
/// consumed by measured-boot sealing.
///
/// Roles absent from `keys_by_role` are simply skipped. Any filesystem
/// failure is fatal; there is no partial retry.
pub async fn prepare_encrypted_system_data(
    model: &Model,
    keys_by_role: &BTreeMap<String, EncryptionKey>,
    trusted_observer: Option<&TrustedAssetsObserver>,
    dirs: &InstallDirs,
) -> Result<()> {
    tracing::info!(
        model = %model.model(),
        roles = ?keys_by_role.keys().collect::<Vec<_>>(),
        "provisioning encryption keys and install markers"
    );

    let data_fde_dir = dirs.data_fde_dir();
    let save_fde_dir = dirs.save_fde_dir();
    for dir in [&data_fde_dir, &save_fde_dir] {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("cannot create FDE state directory {}", dir.display()))?;
    }

    for (role, key) in keys_by_role {
        let key_path = data_fde_dir.join(format!("{role}.key"));
        write_secret(&key_path, key.as_bytes())
            .await
            .with_context(|| format!("cannot store encryption key for role {role}"))?;
    }

    // The same marker lands on both partitions so later boot stages can
    // detect a data/save mismatch.
    let mut marker = vec![0u8; MARKER_LEN];
    rand::thread_rng().fill_bytes(&mut marker);
    for dir in [&data_fde_dir, &save_fde_dir] {
        write_secret(&dir.join("marker"), &marker)
            .await
            .with_context(|| format!("cannot store encryption marker in {}", dir.display()))?;
    }

    if let Some(observer) = trusted_observer {
        observer
            .flush_asset_cache(&dirs.boot_assets_cache_dir())
            .await
            .context("cannot update cached boot assets")?;
    }

    Ok(())
}

async fn write_secret(path: &Path, bytes: &[u8]) -> Result<()> {
    tokio::fs::write(path, bytes).await?;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).await?;
    Ok(())
}
