use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context as _, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const SYSTEM_SEED: &str = "system-seed";
pub const SYSTEM_BOOT: &str = "system-boot";
pub const SYSTEM_DATA: &str = "system-data";
pub const SYSTEM_SAVE: &str = "system-save";

pub const GADGET_LAYOUT_FILE: &str = "gadget.toml";

/// Volume layout declared by the gadget: every volume is an ordered
/// sequence of structures, each optionally tagged with a role.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
#[serde(deny_unknown_fields)]
pub struct GadgetLayout {
    pub volumes: BTreeMap<String, Volume>,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
#[serde(deny_unknown_fields)]
pub struct Volume {
    /// Bootloader installed on this volume, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bootloader: Option<String>,

    #[serde(default)]
    pub structure: Vec<VolumeStructure>,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
#[serde(deny_unknown_fields)]
pub struct VolumeStructure {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub filesystem: Option<String>,

    /// Size in bytes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

impl GadgetLayout {
    /// Loads the layout from `gadget.toml` in the unpacked gadget
    /// directory. An unreadable or malformed layout is fatal.
    pub async fn load(gadget_dir: impl AsRef<Path>) -> Result<Self> {
        let layout_path = gadget_dir.as_ref().join(GADGET_LAYOUT_FILE);

        tracing::debug!("Loading gadget layout from: {layout_path:?}");
        let layout = tokio::fs::read_to_string(&layout_path)
            .await
            .map_err(anyhow::Error::from)
            .and_then(|content| {
                toml::from_str::<GadgetLayout>(&content)
                    .context("Failed to parse content as TOML")
            })
            .with_context(|| format!("Failed to load gadget layout from: {layout_path:?}"))?;

        Ok(layout)
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.volumes.values().any(|volume| {
            volume
                .structure
                .iter()
                .any(|structure| structure.role.as_deref() == Some(role))
        })
    }
}

/// The layout cannot host encrypted roles.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("gadget does not support encrypted data: required partition with system-save role is missing")]
pub struct IncompatibleGadget;

/// Encrypted installs keep per-boot state on a dedicated save
/// partition, so one structure with the system-save role must exist in
/// some volume. Pure check, independent of any capability probe.
pub fn check_encryption_compatible(layout: &GadgetLayout) -> Result<(), IncompatibleGadget> {
    if layout.has_role(SYSTEM_SAVE) {
        Ok(())
    } else {
        Err(IncompatibleGadget)
    }
}

#[cfg(test)]
pub mod tests {

    #[allow(unused_imports)]
    use super::*;
    use anyhow::Result;

    pub const LAYOUT_WITH_SAVE: &str = r#"
[volumes.pc]
bootloader = "grub"

[[volumes.pc.structure]]
name = "seed"
role = "system-seed"
filesystem = "vfat"
size = 20971520

[[volumes.pc.structure]]
name = "boot"
role = "system-boot"
filesystem = "ext4"
size = 10485760

[[volumes.pc.structure]]
name = "data"
role = "system-data"
filesystem = "ext4"
size = 52428800

[[volumes.pc.structure]]
name = "save"
role = "system-save"
filesystem = "ext4"
size = 52428800
"#;

    pub const LAYOUT_WITHOUT_SAVE: &str = r#"
[volumes.pc]
bootloader = "grub"

[[volumes.pc.structure]]
name = "seed"
role = "system-seed"
filesystem = "vfat"

[[volumes.pc.structure]]
name = "data"
role = "system-data"
filesystem = "ext4"
"#;

    #[test]
    fn test_deserialize_layout() -> Result<()> {
        let layout: GadgetLayout = toml::from_str(LAYOUT_WITH_SAVE)?;

        let pc = &layout.volumes["pc"];
        assert_eq!(pc.bootloader.as_deref(), Some("grub"));
        assert_eq!(pc.structure.len(), 4);
        assert_eq!(pc.structure[0].role.as_deref(), Some(SYSTEM_SEED));
        assert_eq!(pc.structure[3].size, Some(52428800));

        assert!(layout.has_role(SYSTEM_SAVE));
        assert!(!layout.has_role("system-recovery-select"));

        Ok(())
    }

    #[test]
    fn test_deserialize_wrong_layout() {
        assert!(toml::from_str::<GadgetLayout>("[volumes.pc]\nbootloaderrr = \"grub\"").is_err());
    }

    #[test]
    fn test_encryption_compatibility() -> Result<()> {
        let with_save: GadgetLayout = toml::from_str(LAYOUT_WITH_SAVE)?;
        assert!(check_encryption_compatible(&with_save).is_ok());

        let without_save: GadgetLayout = toml::from_str(LAYOUT_WITHOUT_SAVE)?;
        let err = check_encryption_compatible(&without_save).unwrap_err();
        assert_eq!(
            err.to_string(),
            "gadget does not support encrypted data: required partition with system-save role is missing"
        );

        Ok(())
    }

    #[tokio::test]
    async fn test_load_layout_from_dir() -> Result<()> {
        let gadget_dir = tempfile::tempdir()?;
        tokio::fs::write(gadget_dir.path().join(GADGET_LAYOUT_FILE), LAYOUT_WITH_SAVE).await?;

        let layout = GadgetLayout::load(gadget_dir.path()).await?;
        assert!(layout.has_role(SYSTEM_SAVE));

        assert!(GadgetLayout::load(gadget_dir.path().join("nonexistent"))
            .await
            .is_err());

        Ok(())
    }
}
