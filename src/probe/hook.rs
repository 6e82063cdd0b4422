use anyhow::{Context as _, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::process::Command;

use super::cmd::CheckCommandOutput as _;
use crate::types::EncryptionType;

/// Operation requested from the kernel fde-setup hook when probing for
/// encryption support.
pub const OP_INITIAL_SETUP: &str = "initial-setup";

/// Feature token selecting the inline-crypto-engine LUKS variant.
pub const FEATURE_INLINE_CRYPTO_ENGINE: &str = "inline-crypto-engine";

/// Operation descriptor handed to the hook, JSON-encoded on the wire.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct SetupRequest {
    pub op: String,
}

impl SetupRequest {
    pub fn initial_setup() -> Self {
        Self {
            op: OP_INITIAL_SETUP.to_string(),
        }
    }
}

/// Runs the kernel fde-setup hook and returns its raw output bytes.
#[async_trait]
pub trait HookRunner: Send + Sync {
    async fn run_setup_hook(&self, request: &SetupRequest) -> Result<Vec<u8>>;
}

#[derive(Debug, Error)]
pub enum HookError {
    /// Output that does not decode per the hook wire contract. Fatal,
    /// never downgraded to an availability verdict.
    #[error("cannot parse hook output {output:?}: {reason}")]
    Parse { output: String, reason: String },

    /// Well-formed output carrying no verdict at all. Fatal.
    #[error("cannot use hook: neither \"features\" nor \"error\" returned")]
    NoVerdict,

    /// The hook ran and reported that encryption cannot be used.
    #[error("cannot use hook: it returned error: {0}")]
    Unavailable(String),
}

impl HookError {
    pub fn is_parse_error(&self) -> bool {
        matches!(self, HookError::Parse { .. } | HookError::NoVerdict)
    }
}

#[derive(Deserialize, Debug)]
struct HookOutput {
    error: Option<String>,
    features: Option<Vec<String>>,
}

/// Decodes fde-setup hook output into the encryption type it grants.
/// Exactly one of `error` or `features` must be present; an empty
/// feature list is a valid grant of plain LUKS.
pub fn features_from_hook_output(output: &[u8]) -> Result<EncryptionType, HookError> {
    let parse_error = |reason: String| HookError::Parse {
        output: String::from_utf8_lossy(output).into_owned(),
        reason,
    };

    let decoded: HookOutput =
        serde_json::from_slice(output).map_err(|err| parse_error(err.to_string()))?;

    match (decoded.error, decoded.features) {
        (Some(_), Some(_)) => Err(parse_error(
            r#"both "features" and "error" returned"#.to_string(),
        )),
        (Some(error), None) => Err(HookError::Unavailable(error)),
        (None, Some(features)) => {
            if features.iter().any(|f| f == FEATURE_INLINE_CRYPTO_ENGINE) {
                Ok(EncryptionType::LuksWithIce)
            } else {
                Ok(EncryptionType::Luks)
            }
        }
        (None, None) => Err(HookError::NoVerdict),
    }
}

/// Probes encryption support through the fde-setup hook. Runner-level
/// failures surface as plain errors the policy downgrades; decode
/// violations surface as [`HookError`] and abort resolution.
pub async fn check_fde_features(runner: &dyn HookRunner) -> Result<EncryptionType> {
    let output = runner.run_setup_hook(&SetupRequest::initial_setup()).await?;
    Ok(features_from_hook_output(&output)?)
}

/// Hook runner executing a configured hook command, feeding the
/// JSON-encoded request on stdin and returning raw stdout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecHookRunner {
    command: String,
    args: Vec<String>,
}

impl ExecHookRunner {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
        }
    }
}

#[async_trait]
impl HookRunner for ExecHookRunner {
    async fn run_setup_hook(&self, request: &SetupRequest) -> Result<Vec<u8>> {
        let input = serde_json::to_vec(request).context("Failed to encode hook request")?;

        Command::new(&self.command)
            .args(&self.args)
            .run_with_input(Some(&input))
            .await
            .with_context(|| format!("Failed to run fde-setup hook: {}", self.command))
    }
}
