// Install pipeline integration tests: resolve the encryption policy,
// build the observers, provision keys and markers, prepare the target
// system data, all against a scratch target tree.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

use anyhow::{bail, Result};
use async_trait::async_trait;
use tempfile::TempDir;

use installpilot::{
    clock::Clock,
    gadget::{GadgetLayout, GADGET_LAYOUT_FILE, SYSTEM_DATA, SYSTEM_SAVE},
    model::{Grade, KernelInfo, Model, ModelSnap, SnapType, StorageSafety},
    observer::{Bootloader, Decision},
    paths::InstallDirs,
    policy::{check_encryption_support, get_encryption_support_info},
    prepare::prepare_run_system_data,
    probe::{
        hook::{ExecHookRunner, HookRunner, SetupRequest},
        select_backend,
        tpm::{TpmProvisionMode, TpmSealingProbe},
    },
    provision::{prepare_encrypted_system_data, MARKER_LEN},
    sysconfig::{SysconfigOptions, TargetConfigurator},
    timings::Timings,
    types::{EncryptionKey, EncryptionType},
};

const GADGET_LAYOUT: &str = r#"
[volumes.pc]
bootloader = "grub"

[[volumes.pc.structure]]
name = "seed"
role = "system-seed"
filesystem = "vfat"

[[volumes.pc.structure]]
name = "boot"
role = "system-boot"
filesystem = "ext4"

[[volumes.pc.structure]]
name = "data"
role = "system-data"
filesystem = "ext4"

[[volumes.pc.structure]]
name = "save"
role = "system-save"
filesystem = "ext4"
"#;

struct StaticTpm {
    err: Option<String>,
}

#[async_trait]
impl TpmSealingProbe for StaticTpm {
    async fn sealing_supported(&self, _mode: TpmProvisionMode) -> Result<()> {
        match &self.err {
            Some(err) => bail!("{err}"),
            None => Ok(()),
        }
    }
}

struct StaticHook {
    output: Vec<u8>,
}

#[async_trait]
impl HookRunner for StaticHook {
    async fn run_setup_hook(&self, _request: &SetupRequest) -> Result<Vec<u8>> {
        Ok(self.output.clone())
    }
}

struct GrubBootloader;

impl Bootloader for GrubBootloader {
    fn name(&self) -> &str {
        "grub"
    }

    fn trusted_assets(&self) -> Vec<String> {
        vec!["EFI/boot/grubx64.efi".to_string()]
    }

    fn managed_assets(&self) -> Vec<String> {
        vec!["EFI/grub/grub.cfg".to_string()]
    }
}

struct RecordingConfigurator {
    calls: Mutex<Vec<SysconfigOptions>>,
}

impl RecordingConfigurator {
    fn new() -> Self {
        Self {
            calls: Mutex::new(vec![]),
        }
    }
}

#[async_trait]
impl TargetConfigurator for RecordingConfigurator {
    async fn configure_target_system(&self, _model: &Model, opts: &SysconfigOptions) -> Result<()> {
        self.calls.lock().expect("poisoned lock").push(opts.clone());
        Ok(())
    }
}

struct FixedClock(SystemTime);

impl Clock for FixedClock {
    fn now(&self) -> SystemTime {
        self.0
    }
}

fn install_model(grade: Grade, storage_safety: Option<StorageSafety>) -> Model {
    Model::new(
        "my-model",
        grade,
        storage_safety,
        vec![
            ModelSnap {
                name: "pc-kernel".into(),
                snap_type: SnapType::Kernel,
                default_channel: Some("20".into()),
            },
            ModelSnap {
                name: "pc".into(),
                snap_type: SnapType::Gadget,
                default_channel: Some("20".into()),
            },
        ],
    )
}

async fn scratch_install() -> Result<(TempDir, InstallDirs, TempDir, GadgetLayout)> {
    let tmp = tempfile::tempdir()?;
    let dirs = InstallDirs::under_run_mnt(tmp.path());

    let gadget_dir = tempfile::tempdir()?;
    tokio::fs::write(gadget_dir.path().join(GADGET_LAYOUT_FILE), GADGET_LAYOUT).await?;
    let layout = GadgetLayout::load(gadget_dir.path()).await?;

    Ok((tmp, dirs, gadget_dir, layout))
}

#[tokio::test]
async fn test_full_pipeline_with_tpm() -> Result<()> {
    let (_tmp, dirs, gadget_dir, layout) = scratch_install().await?;
    let model = install_model(Grade::Dangerous, None);

    // resolve: dangerous grade, storage-safety unset, TPM available
    let tpm = StaticTpm { err: None };
    let backend = select_backend(&KernelInfo::default(), &tpm, TpmProvisionMode::Full, None);
    let info = get_encryption_support_info(&model, &backend, &layout, &dirs).await?;
    assert!(info.available);
    assert!(!info.disabled);
    assert_eq!(info.storage_safety, StorageSafety::PreferEncrypted);
    assert_eq!(info.encryption_type, EncryptionType::Luks);

    let encryption_type = check_encryption_support(&model, &backend, &layout, &dirs).await?;
    assert_eq!(encryption_type, EncryptionType::Luks);

    // observers: trusted assets plus encryption share one instance
    let bootloader = GrubBootloader;
    let (content_observer, trusted_observer) = installpilot::observer::build_install_observer(
        &model,
        gadget_dir.path(),
        !encryption_type.is_none(),
        &bootloader,
    )?;
    let content_observer = content_observer.expect("content observer");
    let trusted_observer = trusted_observer.expect("trusted observer");
    assert!(std::sync::Arc::ptr_eq(&content_observer, &trusted_observer));

    // gadget content pass (formatting itself is external)
    let staged = gadget_dir.path().join("grubx64.efi");
    tokio::fs::write(&staged, b"bootloader image").await?;
    let decision = content_observer
        .observe_write(&staged, Path::new("EFI/boot/grubx64.efi"))
        .await?;
    assert_eq!(decision, Decision::Apply);
    let decision = content_observer
        .observe_write(&staged, Path::new("EFI/grub/grub.cfg"))
        .await?;
    assert_eq!(decision, Decision::Ignore);

    // provision the generated keys
    let keys_by_role = BTreeMap::from([
        (SYSTEM_DATA.to_string(), EncryptionKey::random()),
        (SYSTEM_SAVE.to_string(), EncryptionKey::random()),
    ]);
    prepare_encrypted_system_data(&model, &keys_by_role, Some(&trusted_observer), &dirs).await?;

    let data_fde = dirs.data_fde_dir();
    assert!(data_fde.join("system-data.key").exists());
    assert!(data_fde.join("system-save.key").exists());
    let marker = tokio::fs::read(data_fde.join("marker")).await?;
    assert_eq!(marker.len(), MARKER_LEN);
    assert_eq!(
        tokio::fs::read(dirs.save_fde_dir().join("marker")).await?,
        marker
    );
    // exactly one cached trusted asset
    let mut cache_entries =
        tokio::fs::read_dir(dirs.boot_assets_cache_dir().join("grub")).await?;
    let entry = cache_entries.next_entry().await?.expect("cached asset");
    assert!(cache_entries.next_entry().await?.is_none());
    assert!(entry
        .file_name()
        .to_string_lossy()
        .starts_with("grubx64.efi-"));

    // prepare the run system data
    let configurator = RecordingConfigurator::new();
    let clock = FixedClock(SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000));
    let mut timings = Timings::new();
    prepare_run_system_data(
        &model,
        gadget_dir.path(),
        &configurator,
        &clock,
        &dirs,
        &mut timings,
    )
    .await?;

    assert!(dirs.model_record_path().exists());
    assert_eq!(configurator.calls.lock().expect("poisoned lock").len(), 1);
    assert_eq!(timings.spans().len(), 1);

    Ok(())
}

#[tokio::test]
async fn test_secured_without_tpm_aborts() -> Result<()> {
    let (_tmp, dirs, _gadget_dir, layout) = scratch_install().await?;
    let model = install_model(Grade::Secured, None);

    let tpm = StaticTpm {
        err: Some("no tpm".into()),
    };
    let backend = select_backend(&KernelInfo::default(), &tpm, TpmProvisionMode::Full, None);

    let err = check_encryption_support(&model, &backend, &layout, &dirs)
        .await
        .unwrap_err();
    assert_eq!(
        format!("{err:#}"),
        "cannot encrypt device storage as mandated by model grade secured: no tpm"
    );

    Ok(())
}

#[tokio::test]
async fn test_hook_kernel_resolves_through_hook() -> Result<()> {
    let (_tmp, dirs, _gadget_dir, layout) = scratch_install().await?;
    let model = install_model(Grade::Dangerous, None);
    let kernel = KernelInfo::with_hooks(["fde-setup"]);

    // TPM would fail, but the kernel hook preempts it entirely
    let tpm = StaticTpm {
        err: Some("tpm says no".into()),
    };
    let runner = StaticHook {
        output: br#"{"features":["inline-crypto-engine"]}"#.to_vec(),
    };
    let backend = select_backend(&kernel, &tpm, TpmProvisionMode::Full, Some(&runner));
    assert!(backend.is_hook());

    let encryption_type = check_encryption_support(&model, &backend, &layout, &dirs).await?;
    assert_eq!(encryption_type, EncryptionType::LuksWithIce);

    Ok(())
}

#[tokio::test]
async fn test_hook_process_round_trip() -> Result<()> {
    let (_tmp, dirs, _gadget_dir, layout) = scratch_install().await?;
    let model = install_model(Grade::Signed, None);
    let kernel = KernelInfo::with_hooks(["fde-setup"]);

    // a real hook process: echo plays the part of fde-setup
    let tpm = StaticTpm { err: None };
    let runner = ExecHookRunner::new("echo", vec![r#"{"features":[]}"#.into()]);
    let backend = select_backend(&kernel, &tpm, TpmProvisionMode::Full, Some(&runner));
    assert!(backend.is_hook());

    let encryption_type = check_encryption_support(&model, &backend, &layout, &dirs).await?;
    assert_eq!(encryption_type, EncryptionType::Luks);

    Ok(())
}

#[tokio::test]
async fn test_force_unencrypted_end_to_end() -> Result<()> {
    let (_tmp, dirs, _gadget_dir, layout) = scratch_install().await?;
    let model = install_model(Grade::Dangerous, None);

    tokio::fs::create_dir_all(&dirs.seed_root).await?;
    tokio::fs::write(dirs.force_unencrypted_marker(), b"").await?;

    // even a broken TPM never surfaces once the override is present
    let tpm = StaticTpm {
        err: Some("no tpm".into()),
    };
    let backend = select_backend(&KernelInfo::default(), &tpm, TpmProvisionMode::Full, None);
    let info = get_encryption_support_info(&model, &backend, &layout, &dirs).await?;
    assert!(info.disabled);
    assert!(!info.available);
    assert_eq!(info.encryption_type, EncryptionType::None);

    let encryption_type = check_encryption_support(&model, &backend, &layout, &dirs).await?;
    assert_eq!(encryption_type, EncryptionType::None);

    Ok(())
}
