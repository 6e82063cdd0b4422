use anyhow::Result;
use async_trait::async_trait;

/// How much TPM provisioning the installer may perform while checking
/// for sealing support.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TpmProvisionMode {
    Full,
    NoProvision,
}

/// Sealing-support check against the hardware root of trust. The
/// implementation lives with the secure-boot stack; this crate only
/// consumes the verdict: `Ok(())` means keys can be sealed, the error
/// carries the reason they cannot.
#[async_trait]
pub trait TpmSealingProbe: Send + Sync {
    async fn sealing_supported(&self, mode: TpmProvisionMode) -> Result<()>;
}
