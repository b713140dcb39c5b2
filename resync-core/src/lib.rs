//! resync core library: resource identities, handle and event types,
//! configuration, errors.
//!
//! Public API surface:
//! - [`resource`]: [`ResourceIdentity`] and the path identity resolver
//! - [`types`]: open handles, composite handles, editor inputs
//! - [`events`]: external change batches and local operation events
//! - [`config`]: [`ReconcileConfig`] load / defaults
//! - [`error`]: [`ResourceError`], [`ConfigError`]

pub mod config;
pub mod error;
pub mod events;
pub mod resource;
pub mod types;

pub use config::ReconcileConfig;
pub use error::{ConfigError, ResourceError};
pub use events::{ChangeEvent, ChangeKind, FileChangesEvent, LocalOperation, LocalOperationEvent};
pub use resource::{is_equal_or_ancestor, relative_segments, rewrite, PathCasing, ResourceIdentity};
pub use types::{CompositeHandle, EditorInput, GroupId, HandleId, HandleKind, OpenHandle};
