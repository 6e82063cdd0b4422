use std::path::Path;

use anyhow::{Context as _, Result};

use crate::{
    clock::Clock,
    model::Model,
    paths::InstallDirs,
    sysconfig::{self, TargetConfigurator},
    timings::Timings,
};

/// Device configuration drop-in dirs first boot expects to exist.
const WRITABLE_DEFAULTS_SKEL: &[&str] =
    &["etc/udev/rules.d", "etc/modules-load.d", "etc/modprobe.d"];

/// Assembles the target-system data that every install needs, encrypted
/// or not: persists the model record to the boot partition, runs the
/// external configurator with the derived options, lays out the
/// writable-defaults skeleton, and seeds the timesync clock so the
/// first boot does not start with a clock far in the past.
pub async fn prepare_run_system_data(
    model: &Model,
    gadget_dir: &Path,
    configurator: &dyn TargetConfigurator,
    clock: &dyn Clock,
    dirs: &InstallDirs,
    timings: &mut Timings,
) -> Result<()> {
    write_model_record(model, dirs).await?;

    let opts = sysconfig::sysconfig_options_for_install(model, gadget_dir, dirs);
    // the configurator error is the caller's to interpret, propagated
    // as-is
    timings
        .measure(
            "sysconfig-configure-target-system",
            "Configure target system",
            configurator.configure_target_system(model, &opts),
        )
        .await?;

    for rel in WRITABLE_DEFAULTS_SKEL {
        let dir = dirs.writable_defaults_dir().join(rel);
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("cannot create writable defaults directory {}", dir.display()))?;
    }

    seed_timesync_clock(clock, dirs)
        .await
        .context("cannot seed timesyncd clock")?;

    Ok(())
}

async fn write_model_record(model: &Model, dirs: &InstallDirs) -> Result<()> {
    let device_dir = dirs.boot_device_dir();
    tokio::fs::create_dir_all(&device_dir)
        .await
        .with_context(|| format!("cannot create boot device directory {}", device_dir.display()))?;

    let mut encoded = serde_json::to_vec_pretty(model).context("cannot encode model record")?;
    encoded.push(b'\n');

    tokio::fs::write(dirs.model_record_path(), encoded)
        .await
        .context("cannot write model record")?;

    Ok(())
}

/// Copies the running system's timesync clock file into the target
/// tree, forcing its modification time to the current instant: a stale
/// timestamp must never propagate, or the first boot makes a large
/// forward clock jump. A host without the clock file is tolerated.
async fn seed_timesync_clock(clock: &dyn Clock, dirs: &InstallDirs) -> Result<()> {
    let src = dirs.host_timesync_clock();
    let dst = dirs.data_timesync_clock();

    if let Some(parent) = dst.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .context("cannot store the clock")?;
    }

    if !src.exists() {
        tracing::info!(clock = %src.display(), "timesync clock timestamp does not exist");
        return Ok(());
    }

    tokio::fs::copy(&src, &dst).await.context("cannot copy clock")?;

    let now = clock.now();
    std::fs::OpenOptions::new()
        .write(true)
        .open(&dst)
        .and_then(|file| file.set_modified(now))
        .context("cannot update clock timestamp")?;

    Ok(())
}
