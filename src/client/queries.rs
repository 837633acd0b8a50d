//! Paged list queries for the admin views
//!
//! Each helper narrows on the server with the same filter the in-memory views
//! use, then fetches one page: `skip = (page - 1) * per_page`.

use crate::models::{
    Exporter, HsCode, Operation, PageRequest, PagedResult, QuickLink, Record, Tracking, CREATED_AT,
};
use crate::query::{Decoded, Query};
use crate::services::backend::{BackendError, ObjectBackend};
use crate::services::link::sort_links;
use crate::store::views::{CustomsFilter, ExporterFilter, HsCodeFilter, TrackingFilter};

async fn page_of<T: Record>(
    backend: &dyn ObjectBackend,
    query: Query,
    params: PageRequest,
) -> Result<PagedResult<T>, BackendError> {
    let total = query.count(backend).await?;
    let docs = query
        .skip(params.offset())
        .limit(params.per_page)
        .find(backend)
        .await?;
    let items = Decoded::from_documents(docs).warn_failed();
    Ok(PagedResult::new(items, total, params))
}

/// Tracking records, latest arrival first, newest entry first within a day
pub async fn query_tracking(
    backend: &dyn ObjectBackend,
    filter: &TrackingFilter,
    params: PageRequest,
) -> Result<PagedResult<Tracking>, BackendError> {
    let query = filter
        .apply(Query::of::<Tracking>())
        .descending("arrivalDate")
        .add_descending(CREATED_AT);
    page_of(backend, query, params).await
}

/// Declared records, latest arrival first
pub async fn query_customs(
    backend: &dyn ObjectBackend,
    filter: &CustomsFilter,
    params: PageRequest,
) -> Result<PagedResult<Tracking>, BackendError> {
    let query = filter
        .apply(Query::of::<Tracking>())
        .contained_in("operation", Operation::Declared.stored_values())
        .descending("arrivalDate")
        .add_descending(CREATED_AT);
    page_of(backend, query, params).await
}

pub async fn query_hs_codes(
    backend: &dyn ObjectBackend,
    filter: &HsCodeFilter,
    params: PageRequest,
) -> Result<PagedResult<HsCode>, BackendError> {
    let query = filter.apply(Query::of::<HsCode>()).ascending(CREATED_AT);
    page_of(backend, query, params).await
}

pub async fn query_exporters(
    backend: &dyn ObjectBackend,
    filter: &ExporterFilter,
    params: PageRequest,
) -> Result<PagedResult<Exporter>, BackendError> {
    let query = filter.apply(Query::of::<Exporter>()).ascending(CREATED_AT);
    page_of(backend, query, params).await
}

/// All quick links in display order
pub async fn query_quick_links(backend: &dyn ObjectBackend) -> Result<Vec<QuickLink>, BackendError> {
    let mut links: Vec<QuickLink> = Query::of::<QuickLink>()
        .find_all_as(backend, crate::query::MAX_LIMIT)
        .await?;
    sort_links(&mut links);
    Ok(links)
}
