//! Database repositories
//!
//! Repository pattern implementations for database access.
//! Each repository handles the storage operations for one table.

pub mod file;
pub mod object;
pub mod session;
pub mod user;

pub use file::{FileRepository, SqlxFileRepository};
pub use object::{ObjectRepository, SqlxObjectRepository};
pub use session::{SessionRepository, SqlxSessionRepository};
pub use user::{SqlxUserRepository, UserRepository};
