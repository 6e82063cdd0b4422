use std::path::{Path, PathBuf};

use anyhow::Result;
use async_trait::async_trait;

use crate::{
    model::{Grade, Model},
    paths::InstallDirs,
};

/// Cloud-init config a gadget may ship at its root.
pub const GADGET_CLOUD_CONF: &str = "cloud.conf";

/// Options handed to the external target-system configurator. Derived
/// per install, never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SysconfigOptions {
    pub allow_cloud_init: bool,
    pub cloud_init_src_dir: Option<PathBuf>,
    pub target_root_dir: PathBuf,
    pub gadget_dir: PathBuf,
}

/// External configurator applying the options to the target tree.
#[async_trait]
pub trait TargetConfigurator: Send + Sync {
    async fn configure_target_system(&self, model: &Model, opts: &SysconfigOptions) -> Result<()>;
}

/// Derives the configurator options for this install.
///
/// Cloud-init stays allowed unless a secured model ships no gadget
/// `cloud.conf`; in particular it stays allowed when no cloud-init
/// source exists at all, so runtime-supplied cloud-init media keep
/// working later. The seed config dir is reported whenever it exists,
/// independent of grade: filtering it by model is entirely the
/// configurator's business.
pub fn sysconfig_options_for_install(
    model: &Model,
    gadget_dir: &Path,
    dirs: &InstallDirs,
) -> SysconfigOptions {
    let has_gadget_cloud_conf = gadget_dir.join(GADGET_CLOUD_CONF).exists();
    let allow_cloud_init = model.grade() != Grade::Secured || has_gadget_cloud_conf;

    let seed_cloud_cfg = dirs.seed_cloud_config_dir();
    let cloud_init_src_dir = seed_cloud_cfg.is_dir().then_some(seed_cloud_cfg);

    SysconfigOptions {
        allow_cloud_init,
        cloud_init_src_dir,
        target_root_dir: dirs.data_root.clone(),
        gadget_dir: gadget_dir.to_path_buf(),
    }
}
