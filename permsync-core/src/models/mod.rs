pub mod event;
pub mod permission;

pub use event::{PermissionChangeEvent, PermissionEntry, UnknownEffect, UserPermissionChange};
pub use permission::{Effect, Permission, Resource, UserPermission};
