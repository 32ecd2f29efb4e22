pub mod catalog;
pub mod evaluator;
pub mod access;
pub mod assignments;
pub mod audit;
pub mod storage;
pub mod config;
pub mod error;

pub use access::AccessControl;
pub use assignments::{RoleAssignment, RoleAssignments};
pub use catalog::{PermissionCatalog, PermissionSet, Role, DEFAULT_ROLE};
pub use config::{Gate, GateConfig};
pub use error::{AccessError, AccessResult};
pub use evaluator::{Capability, Decision, Query};
