#![deny(clippy::disallowed_methods)]

//! Install-time disk encryption policy and provisioning for graded,
//! signed OS images.
//!
//! The pipeline is strictly sequential, driven by an external
//! orchestrator: [`policy::get_encryption_support_info`] resolves the
//! encryption decision, [`observer::build_install_observer`] prepares
//! the gadget content observers, [`provision::prepare_encrypted_system_data`]
//! persists keys and markers once the (external) formatting is done, and
//! [`prepare::prepare_run_system_data`] assembles the target-system data
//! last. Any failing step aborts the rest; a fresh install starts from a
//! wiped target.

pub mod clock;
pub mod gadget;
pub mod model;
pub mod observer;
pub mod paths;
pub mod policy;
pub mod prepare;
pub mod probe;
pub mod provision;
pub mod sysconfig;
pub mod timings;
pub mod types;
