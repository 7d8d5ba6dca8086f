//! Docker Hub registry pipeline.
//!
//! ```text
//!   token ──► manifest (tag) ──► manifest (platform digest)
//!                                       │
//!                      ┌────────────────┼────────────────┐
//!                      ▼                ▼                ▼
//!                 blob layer 1     blob layer 2  ...  blob layer N     (concurrent)
//!                      └────────────────┼────────────────┘
//!                                       ▼
//!                  extract layer 1 ► layer 2 ► ... ► layer N           (in order)
//! ```

pub mod auth;
pub mod extract;
mod fetch;
pub mod manifest;
mod pull;
pub mod reference;
pub mod registry;

pub use auth::{Authenticator, Credential, Scope, TokenAuthenticator};
pub use extract::{extract_all, extract_archive, extract_layers};
pub use fetch::layer_archive_path;
pub use manifest::{Descriptor, IndexManifest, LayerManifest, Platform, PlatformManifestRef};
pub use pull::{ImagePuller, PullReport};
pub use reference::ImageReference;
pub use registry::RegistryClient;
