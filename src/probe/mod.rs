pub mod cmd;
pub mod hook;
pub mod tpm;

use anyhow::Result;

use crate::{model::KernelInfo, types::EncryptionType};
use hook::HookRunner;
use tpm::{TpmProvisionMode, TpmSealingProbe};

/// Capability backend for one install, resolved once and threaded
/// through the policy. Backends are never mixed within a resolve.
pub enum CapabilityBackend<'a> {
    Tpm {
        probe: &'a dyn TpmSealingProbe,
        mode: TpmProvisionMode,
    },
    Hook {
        runner: &'a dyn HookRunner,
    },
}

/// Picks the backend for this install. A kernel declaring the fde-setup
/// hook preempts the TPM, even when a TPM is present; without a runner
/// handle the hook cannot be consulted and the TPM is probed instead.
pub fn select_backend<'a>(
    kernel: &KernelInfo,
    tpm_probe: &'a dyn TpmSealingProbe,
    tpm_mode: TpmProvisionMode,
    hook_runner: Option<&'a dyn HookRunner>,
) -> CapabilityBackend<'a> {
    match hook_runner {
        Some(runner) if kernel.has_fde_setup_hook() => CapabilityBackend::Hook { runner },
        _ => CapabilityBackend::Tpm {
            probe: tpm_probe,
            mode: tpm_mode,
        },
    }
}

impl CapabilityBackend<'_> {
    pub fn is_hook(&self) -> bool {
        matches!(self, CapabilityBackend::Hook { .. })
    }

    /// Queries the backend once. An error means the capability is not
    /// available and carries the cause; it is the policy's call whether
    /// that is a warning or aborts the install.
    pub async fn probe(&self) -> Result<EncryptionType> {
        match self {
            CapabilityBackend::Tpm { probe, mode } => {
                probe.sealing_supported(*mode).await?;
                Ok(EncryptionType::Luks)
            }
            CapabilityBackend::Hook { runner } => hook::check_fde_features(*runner).await,
        }
    }
}
