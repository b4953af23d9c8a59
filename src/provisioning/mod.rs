//! Asynchronous provisioning of lab environments.
//!
//! A registration spawns one [`ProvisioningPipeline`] run whose outcome
//! lands in the shared [`ProgressStore`], where pollers pick it up.

pub mod pipeline;
pub mod progress;

pub use pipeline::{PipelineSettings, ProvisioningPipeline};
pub use progress::{ConnectionInfo, Credentials, ProgressStore, ProvisioningRecord};
