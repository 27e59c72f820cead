//! Permission policy engine for tool calls.

mod modes;
mod policy;
mod rules;

pub use modes::PermissionMode;
pub use policy::{Classification, PermissionPolicy, PermissionPolicyBuilder};
pub use rules::PatternRule;
