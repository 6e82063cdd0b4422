use std::collections::BTreeSet;
use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};

/// Hook name a kernel declares when it brings its own FDE support.
pub const FDE_SETUP_HOOK: &str = "fde-setup";

/// Image trust tier. Controls the default security posture of the
/// installed system.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Grade {
    Dangerous,
    Signed,
    Secured,
}

impl Display for Grade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Grade::Dangerous => write!(f, "dangerous"),
            Grade::Signed => write!(f, "signed"),
            Grade::Secured => write!(f, "secured"),
        }
    }
}

/// Model option expressing the encryption preference or mandate.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum StorageSafety {
    PreferUnencrypted,
    PreferEncrypted,
    Encrypted,
}

impl Display for StorageSafety {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageSafety::PreferUnencrypted => write!(f, "prefer-unencrypted"),
            StorageSafety::PreferEncrypted => write!(f, "prefer-encrypted"),
            StorageSafety::Encrypted => write!(f, "encrypted"),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SnapType {
    Kernel,
    Gadget,
    Base,
    App,
}

/// One required snap of the model.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ModelSnap {
    pub name: String,
    #[serde(rename = "type")]
    pub snap_type: SnapType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_channel: Option<String>,
}

/// The externally verified device model. Immutable input to the whole
/// install pipeline and the record persisted to the boot partition.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Model {
    model: String,
    grade: Grade,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    storage_safety: Option<StorageSafety>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    snaps: Vec<ModelSnap>,
}

impl Model {
    pub fn new(
        model: impl Into<String>,
        grade: Grade,
        storage_safety: Option<StorageSafety>,
        snaps: Vec<ModelSnap>,
    ) -> Self {
        Self {
            model: model.into(),
            grade,
            storage_safety,
            snaps,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn grade(&self) -> Grade {
        self.grade
    }

    /// The effective storage-safety option. An unset option defaults to
    /// `Encrypted` for secured models and `PreferEncrypted` otherwise,
    /// mirroring what model assembly guarantees upstream.
    pub fn storage_safety(&self) -> StorageSafety {
        self.storage_safety.unwrap_or(match self.grade {
            Grade::Secured => StorageSafety::Encrypted,
            Grade::Dangerous | Grade::Signed => StorageSafety::PreferEncrypted,
        })
    }

    pub fn snaps(&self) -> &[ModelSnap] {
        &self.snaps
    }
}

/// What this crate needs to know about the kernel snap: the hooks it
/// declares.
#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq, Eq)]
pub struct KernelInfo {
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub hooks: BTreeSet<String>,
}

impl KernelInfo {
    pub fn with_hooks<I, S>(hooks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            hooks: hooks.into_iter().map(Into::into).collect(),
        }
    }

    pub fn has_fde_setup_hook(&self) -> bool {
        self.hooks.contains(FDE_SETUP_HOOK)
    }
}

#[cfg(test)]
pub mod tests {

    #[allow(unused_imports)]
    use super::*;
    use anyhow::Result;

    #[test]
    fn test_storage_safety_defaults() {
        let dangerous = Model::new("pc", Grade::Dangerous, None, vec![]);
        assert_eq!(dangerous.storage_safety(), StorageSafety::PreferEncrypted);

        let signed = Model::new("pc", Grade::Signed, None, vec![]);
        assert_eq!(signed.storage_safety(), StorageSafety::PreferEncrypted);

        let secured = Model::new("pc", Grade::Secured, None, vec![]);
        assert_eq!(secured.storage_safety(), StorageSafety::Encrypted);

        let explicit = Model::new(
            "pc",
            Grade::Dangerous,
            Some(StorageSafety::PreferUnencrypted),
            vec![],
        );
        assert_eq!(explicit.storage_safety(), StorageSafety::PreferUnencrypted);
    }

    #[test]
    fn test_model_record_round_trip() -> Result<()> {
        let model = Model::new(
            "my-model",
            Grade::Signed,
            Some(StorageSafety::Encrypted),
            vec![ModelSnap {
                name: "pc-kernel".into(),
                snap_type: SnapType::Kernel,
                default_channel: Some("20".into()),
            }],
        );

        let encoded = serde_json::to_string(&model)?;
        assert!(encoded.contains(r#""storage-safety":"encrypted""#));
        assert!(encoded.contains(r#""default-channel":"20""#));

        let decoded: Model = serde_json::from_str(&encoded)?;
        assert_eq!(decoded, model);

        Ok(())
    }

    #[test]
    fn test_kernel_info_hooks() {
        let plain = KernelInfo::default();
        assert!(!plain.has_fde_setup_hook());

        let with_hook = KernelInfo::with_hooks(["fde-setup", "install-device"]);
        assert!(with_hook.has_fde_setup_hook());
    }
}
