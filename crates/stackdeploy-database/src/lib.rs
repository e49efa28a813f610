//! Database connection, owner scoping and test utilities

pub use sea_orm;
mod connection;
mod scope;

pub use connection::{establish_connection, DbConnection};
pub use scope::{begin_owner_scope, begin_system_scope, CURRENT_USER_SETTING, SYSTEM_SCOPE_MARKER};

// Export test utilities for use by other crates in their tests
pub mod test_utils;
