//! restorico-models — Weight provisioning.
//!
//! Ensures the ONNX weight files named in the manifest exist in the model
//! directory, downloading the missing ones once.

pub mod fetch;
pub mod manifest;
pub mod provision;

pub use fetch::{FetchError, Fetcher, HttpFetcher};
pub use manifest::{Manifest, ManifestError, WeightSource};
pub use provision::{ensure_weights, verify_weights, Action, Integrity, ProvisionError, Provisioned};
