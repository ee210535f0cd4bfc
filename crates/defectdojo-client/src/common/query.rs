//! Query utilities for the DefectDojo API
//!
//! Provides helpers for building list queries and handling pagination.

use crate::common::{HttpClient, PaginatedResponse};
use crate::error::DefectDojoError;
use serde::Deserialize;

/// Page size requested on every list call
pub const PAGE_LIMIT: &str = "100";

/// Query resources with optional filtering and pagination
pub async fn query_resources<T: for<'de> Deserialize<'de>>(
    http: &HttpClient,
    endpoint: &str,
    filters: &[(&str, &str)],
    fetch_all: bool,
) -> Result<Vec<T>, DefectDojoError> {
    let mut params: Vec<(&str, &str)> = filters.to_vec();
    if !params.iter().any(|(k, _)| *k == "limit") {
        params.push(("limit", PAGE_LIMIT));
    }

    let url = format!("/api/v2/{}/?{}", endpoint, http.build_query_string(&params));

    if fetch_all {
        http.fetch_all_pages(http.build_url(&url)).await
    } else {
        let response: PaginatedResponse<T> = http.get(&url).await?;
        Ok(response.results)
    }
}
