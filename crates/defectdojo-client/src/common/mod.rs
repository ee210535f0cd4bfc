//! Common utilities for the DefectDojo API client
//!
//! Provides the authenticated HTTP wrapper shared by every endpoint.

pub mod query;

use crate::error::DefectDojoError;
use reqwest::multipart::Form;
use reqwest::header::{ACCEPT, AUTHORIZATION};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Paginated response wrapper from the DefectDojo API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaginatedResponse<T> {
    pub count: u64,
    pub next: Option<String>,
    pub previous: Option<String>,
    pub results: Vec<T>,
}

/// HTTP client wrapper with token authentication
pub struct HttpClient {
    client: Client,
    base_url: String,
    token: String,
}

impl HttpClient {
    /// Create a new HTTP client wrapper
    pub fn new(client: Client, base_url: String, token: String) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        }
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Build a full URL from a path
    pub fn build_url(&self, path: &str) -> String {
        if path.starts_with("http") {
            path.to_string()
        } else {
            format!("{}{}", self.base_url, path)
        }
    }

    /// Get authorization header value
    pub fn auth_header(&self) -> String {
        format!("Token {}", self.token)
    }

    /// Turn a non-success response into an error, keeping the body for context
    async fn check(response: Response, what: &str) -> Result<Response, DefectDojoError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        match status {
            StatusCode::NOT_FOUND => Err(DefectDojoError::NotFound(format!("{} - {}", what, body))),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(DefectDojoError::Authentication(
                format!("{} rejected: {} - {}", what, status, body),
            )),
            _ => Err(DefectDojoError::api(status, format!("{} failed: {}", what, body))),
        }
    }

    /// Authenticated request builder for `path`
    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = self.build_url(path);
        debug!("{} {}", method, url);
        self.client
            .request(method, url)
            .header(AUTHORIZATION, self.auth_header())
            .header(ACCEPT, "application/json")
    }

    /// Send `request` and decode the JSON body of a successful response
    async fn send<T: for<'de> Deserialize<'de>>(request: RequestBuilder, what: &str) -> Result<T, DefectDojoError> {
        let response = Self::check(request.send().await?, what).await?;
        let text = response.text().await?;
        serde_json::from_str(&text).map_err(|e| {
            DefectDojoError::InvalidRequest(format!(
                "cannot decode {} response: {} - body starts with: {}",
                what,
                e,
                text.chars().take(500).collect::<String>()
            ))
        })
    }

    /// Follow `next` links and collect the results of every page
    pub async fn fetch_all_pages<T: for<'de> Deserialize<'de>>(&self, first: String) -> Result<Vec<T>, DefectDojoError> {
        let mut results = Vec::new();
        let mut next = Some(first);

        while let Some(url) = next {
            let what = format!("GET {}", url);
            let page: PaginatedResponse<T> = Self::send(self.request(Method::GET, &url), &what).await?;
            results.extend(page.results);
            next = page.next;
        }

        Ok(results)
    }

    pub async fn get<T: for<'de> Deserialize<'de>>(&self, path: &str) -> Result<T, DefectDojoError> {
        Self::send(self.request(Method::GET, path), &format!("GET {}", path)).await
    }

    pub async fn post<B: Serialize + ?Sized, T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, DefectDojoError> {
        Self::send(self.request(Method::POST, path).json(body), &format!("POST {}", path)).await
    }

    pub async fn patch<B: Serialize + ?Sized, T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, DefectDojoError> {
        Self::send(self.request(Method::PATCH, path).json(body), &format!("PATCH {}", path)).await
    }

    /// Multipart POST, used for scan imports
    pub async fn post_multipart<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        form: Form,
    ) -> Result<T, DefectDojoError> {
        Self::send(self.request(Method::POST, path).multipart(form), &format!("POST {}", path)).await
    }

    pub async fn delete(&self, path: &str) -> Result<(), DefectDojoError> {
        let response = self.request(Method::DELETE, path).send().await?;
        Self::check(response, &format!("DELETE {}", path)).await?;
        Ok(())
    }

    /// Build query string from filters
    pub fn build_query_string(&self, filters: &[(&str, &str)]) -> String {
        filters
            .iter()
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&")
    }
}
