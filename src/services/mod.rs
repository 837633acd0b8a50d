//! Services layer - Business logic
//!
//! - `object` / `file`: the document store behind `POST /api/store`
//! - `user` / `password`: operator accounts and sessions
//! - `attachment`, `sync`, `import`, `dashboard`, `link`: tracking workflows
//!   written against [`ObjectBackend`], so they run in-process or remotely

pub mod attachment;
pub mod backend;
pub mod dashboard;
pub mod file;
pub mod import;
pub mod link;
pub mod object;
pub mod password;
pub mod sync;
pub mod user;

pub use attachment::{
    AssociationReport, AttachmentError, AttachmentService, FileEntry, UploadGuard, UploadReport,
};
pub use backend::{codes, BackendError, BatchItem, ObjectBackend};
pub use dashboard::{DashboardCard, DashboardCounts, DashboardService};
pub use file::{FileService, FileServiceError};
pub use import::{ImportError, ImportOptions, ImportReport, ImportService, Sheet};
pub use link::LinkService;
pub use object::ObjectService;
pub use password::{hash_password, verify_password};
pub use sync::{SyncReport, SyncService};
pub use user::{UserService, UserServiceError};
