//! ACL change requests and the privileged side effects they turn into.
//!
//! A request is validated and rendered into the canonical
//! `[default:]type:entity:perms` string, then handed to one of two strategies:
//!
//! - [`ExecDispatcher`] runs `setfacl` in-process (the process needs ACL rights)
//! - [`ForwardDispatcher`] sends the entry to a root daemon over a unix socket
//!
//! Every outcome, including validation and transport problems, comes back as an
//! [`AclResult`]; nothing here is reported as an RPC error.

pub mod dispatcher;
pub mod entry;
pub mod error;
pub mod exec;
pub mod forward;
pub mod request;

pub use dispatcher::{DispatchStrategy, Dispatcher};
pub use entry::{build_acl_entry, AclAction, AclEntry, EntityType};
pub use error::ValidationError;
pub use exec::ExecDispatcher;
pub use forward::{ForwardDispatcher, ForwardError, IpcRequest, IpcResponse};
pub use request::{AclCommand, AclRequest, AclResult};
