//! Data model shared by the LAN file sharer's sender and receiver: the
//! discovered service record, the recursive file manifest tree, and the
//! ephemeral-key signature that binds a manifest to one ask.

pub mod error;
pub mod file_node;
pub mod manifest;
pub mod service_record;

pub use error::{ManifestError, Result};
pub use file_node::{build_manifest, leaves, total_size, FileNode};
pub use manifest::{canonical_encoding, sign, verify, SignedManifest};
pub use service_record::ServiceRecord;
