//! Provisions a two-zone EC2 fleet from a transient launch template,
//! then shares multi-attach io2 volumes across the launched instances.
pub mod aws;
pub mod cancel;
pub mod errors;
pub mod fleet;
pub mod placement;
pub mod provider;
pub mod provision;
pub mod readiness;
pub mod request;
pub mod spec;
pub mod template;
pub mod validate;
pub mod volume;

#[cfg(test)]
mod testing;

pub use crate::{
    cancel::Cancellation,
    errors::{Error, Result, ValidationError},
    provider::Ec2Provider,
    provision::{provision, ProvisioningReport},
    request::{ProvisionOptions, ProvisioningRequest},
    spec::Spec,
};
