//! Administrator control plane: the authorization gate, the command
//! processor, status reporting and the core event loop.

pub mod command;
pub mod gate;
pub mod processor;
pub mod router;
pub mod status;
pub mod sync;
pub mod update;

pub use {
    command::Command,
    gate::{AdminFile, AdminSource, AuthorizationGate, StaticAdmins},
    processor::{CommandProcessor, Requester},
    router::{DEFAULT_ADMIN_PLACEHOLDER, EventRouter},
    status::{BackendStatus, StatusReport},
    sync::reconcile_backend,
    update::{GitUpdateChecker, UpdateChecker, UpdateStatus},
};
