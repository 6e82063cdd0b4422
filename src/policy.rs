use anyhow::{anyhow, Result};

use crate::{
    gadget::{self, GadgetLayout},
    model::{Grade, Model, StorageSafety},
    paths::InstallDirs,
    probe::{hook::HookError, CapabilityBackend},
    types::EncryptionType,
};

/// Outcome of resolving the encryption policy for one install.
///
/// Every policy verdict is expressed in here; the resolver only returns
/// an error for malformed inputs, such as hook output violating the
/// wire contract. `unavailable_err` is set when encryption is mandated
/// but impossible, `unavailable_warning` when it is merely preferred;
/// the two are mutually exclusive.
///
/// With [`StorageSafety::PreferUnencrypted`] the info still reports
/// `available` and the `encryption_type` that would be used, so callers
/// can tell the capability exists. `encryption_type != None` therefore
/// does not mean encryption is active; the decision is made by
/// [`check_encryption_support`].
#[derive(Debug)]
pub struct EncryptionSupportInfo {
    pub available: bool,
    pub disabled: bool,
    pub storage_safety: StorageSafety,
    pub encryption_type: EncryptionType,
    pub unavailable_warning: Option<String>,
    pub unavailable_err: Option<anyhow::Error>,
}

/// Resolves whether and how the target device storage gets encrypted,
/// combining model grade, storage-safety option, the capability backend
/// verdict and gadget layout compatibility.
pub async fn get_encryption_support_info(
    model: &Model,
    backend: &CapabilityBackend<'_>,
    layout: &GadgetLayout,
    dirs: &InstallDirs,
) -> Result<EncryptionSupportInfo> {
    let secured = model.grade() == Grade::Secured;
    let dangerous = model.grade() == Grade::Dangerous;
    let storage_safety = model.storage_safety();
    let mandated = secured || storage_safety == StorageSafety::Encrypted;

    let mut res = EncryptionSupportInfo {
        available: false,
        disabled: false,
        storage_safety,
        encryption_type: EncryptionType::None,
        unavailable_warning: None,
        unavailable_err: None,
    };

    // Encryption can only be switched off on dangerous models. With the
    // override marker present no probe runs at all, so not even a
    // failing TPM or hook ever surfaces.
    if dangerous && dirs.force_unencrypted_marker().exists() {
        res.disabled = true;
        return Ok(res);
    }

    match backend.probe().await {
        Ok(encryption_type) => {
            res.available = true;
            res.encryption_type = encryption_type;
        }
        Err(err) => {
            if err
                .downcast_ref::<HookError>()
                .is_some_and(HookError::is_parse_error)
            {
                return Err(err);
            }
            if secured {
                res.unavailable_err = Some(anyhow!(
                    "cannot encrypt device storage as mandated by model grade secured: {err:#}"
                ));
            } else if storage_safety == StorageSafety::Encrypted {
                res.unavailable_err = Some(anyhow!(
                    "cannot encrypt device storage as mandated by encrypted storage-safety model option: {err:#}"
                ));
            } else if backend.is_hook() {
                res.unavailable_warning = Some(format!(
                    "not encrypting device storage as querying kernel fde-setup hook did not succeed: {err:#}"
                ));
            } else {
                res.unavailable_warning = Some(format!(
                    "not encrypting device storage as checking TPM gave: {err:#}"
                ));
            }
        }
    }

    // A layout that cannot host encrypted roles overrides a successful
    // probe.
    if res.available {
        if let Err(incompatible) = gadget::check_encryption_compatible(layout) {
            if mandated {
                res.unavailable_err =
                    Some(anyhow!("cannot use encryption with the gadget: {incompatible}"));
            } else {
                res.unavailable_warning = Some(format!(
                    "cannot use encryption with the gadget, disabling encryption: {incompatible}"
                ));
            }
            res.available = false;
            res.encryption_type = EncryptionType::None;
        }
    }

    Ok(res)
}

/// Thin projection of [`get_encryption_support_info`] into the install
/// decision: logs the warning when encryption is unavailable but merely
/// preferred, fails when it is mandated, and yields the type to encrypt
/// with otherwise. A prefer-unencrypted model decides against
/// encryption even when the capability is there.
pub async fn check_encryption_support(
    model: &Model,
    backend: &CapabilityBackend<'_>,
    layout: &GadgetLayout,
    dirs: &InstallDirs,
) -> Result<EncryptionType> {
    let res = get_encryption_support_info(model, backend, layout, dirs).await?;

    if let Some(warning) = &res.unavailable_warning {
        tracing::warn!("{warning}");
    }
    if let Some(err) = res.unavailable_err {
        return Err(err);
    }

    let encrypt = res.available
        && matches!(
            res.storage_safety,
            StorageSafety::Encrypted | StorageSafety::PreferEncrypted
        );

    Ok(if encrypt {
        res.encryption_type
    } else {
        EncryptionType::None
    })
}
