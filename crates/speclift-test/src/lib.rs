//! Test harnesses for speclift.
//!
//! `MockRegistry` stands in for the spec registry (and the OAuth token
//! endpoint) over real HTTP; `Workspace` builds throwaway CI workspaces.

pub mod fixtures;
#[cfg(test)]
mod pipeline;
pub mod registry;

pub use fixtures::{fixtures, service_account_for, Workspace};
pub use registry::{MockRegistry, ReceivedUpload};
