//! Data models
//!
//! - Stored documents and the typed record classes built on them
//!   (tracking rows, HS codes, exporters, quick links)
//! - Operator accounts, sessions and uploaded files
//! - Pagination for list views

mod file;
mod link;
mod object;
mod paging;
mod reference;
mod session;
mod tracking;
mod user;

pub use file::{FileUpload, StoredFile, DEFAULT_MIME_TYPE, FILE_CLASS};
pub use link::{
    QuickLink, DEFAULT_LINK_CATEGORY, DEFAULT_LINK_ICON, DEFAULT_LINK_ORDER, DEFAULT_LINK_TITLE,
    LINK_CATEGORIES, LINK_CLASS,
};
pub use object::{
    is_reserved_field, parse_timestamp, strip_reserved, wire_timestamp, Document, DocumentError,
    Record, CREATED_AT, OBJECT_ID, UPDATED_AT,
};
pub use paging::{PageRequest, PagedResult, DEFAULT_PAGE_SIZE, PAGE_WINDOW};
pub use reference::{Exporter, HsCode, EXPORTER_CLASS, HS_CODE_CLASS};
pub use session::Session;
pub use tracking::{
    parse_date, Attachment, CustomsStatus, Operation, Tracking, QUARANTINE_CERTIFICATE,
    TRACKING_CLASS,
};
pub use user::User;
