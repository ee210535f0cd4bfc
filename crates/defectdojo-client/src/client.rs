//! DefectDojo API client
//!
//! Implements the subset of the DefectDojo v2 REST API the scan controller needs:
//! product types, products, engagements, tests, scan import and system settings.

use crate::common::query::query_resources;
use crate::common::HttpClient;
use crate::dojo_trait::DefectDojoClientTrait;
use crate::error::DefectDojoError;
use crate::models::*;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::{debug, info};

/// Default per-request timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// DefectDojo API client
pub struct DefectDojoClient {
    http: HttpClient,
}

impl DefectDojoClient {
    /// Create a new DefectDojo client
    ///
    /// # Arguments
    /// * `base_url` - DefectDojo base URL (e.g., "https://defectdojo.example.com")
    /// * `token` - API token for authentication
    pub fn new(base_url: String, token: String) -> Result<Self, DefectDojoError> {
        Self::with_timeout(base_url, token, DEFAULT_TIMEOUT)
    }

    /// Create a new DefectDojo client with an explicit request timeout
    pub fn with_timeout(base_url: String, token: String, timeout: Duration) -> Result<Self, DefectDojoError> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            http: HttpClient::new(client, base_url, token),
        })
    }

    /// Exchange username and password for an API token and build a client with it.
    ///
    /// Used when no long-lived token is configured.
    pub async fn login(
        base_url: String,
        username: &str,
        password: &str,
        timeout: Duration,
    ) -> Result<Self, DefectDojoError> {
        if username.is_empty() || password.is_empty() {
            return Err(DefectDojoError::Authentication("username or password is empty".to_string()));
        }

        let client = Client::builder().timeout(timeout).build()?;
        let url = format!("{}/api/v2/api-token-auth/", base_url.trim_end_matches('/'));
        debug!("Requesting API token for user {}", username);

        let response = client
            .post(&url)
            .header("Accept", "application/json")
            .json(&serde_json::json!({ "username": username, "password": password }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DefectDojoError::Authentication(format!(
                "token request failed: {} - {}",
                status, body
            )));
        }

        let auth: AuthToken = response.json().await?;
        info!("Obtained DefectDojo API token for user {}", username);

        Ok(Self {
            http: HttpClient::new(client, base_url, auth.token),
        })
    }

    /// Map a failed create call to `AlreadyExists` when DefectDojo rejected a duplicate name
    fn classify_create_error(name: &str, err: DefectDojoError) -> DefectDojoError {
        match err {
            DefectDojoError::Api { status, message }
                if status == StatusCode::BAD_REQUEST && message.to_lowercase().contains("already exists") =>
            {
                DefectDojoError::AlreadyExists(name.to_string())
            }
            other => other,
        }
    }
}

#[async_trait::async_trait]
impl DefectDojoClientTrait for DefectDojoClient {
    fn base_url(&self) -> &str {
        self.http.base_url()
    }

    /// Validate the API token by fetching the caller's own profile.
    async fn validate_token(&self) -> Result<(), DefectDojoError> {
        debug!("Validating DefectDojo token and connectivity");
        let _: serde_json::Value = self.http.get("/api/v2/user_profile/").await?;
        debug!("Token validated successfully");
        Ok(())
    }

    async fn query_product_types(&self, filters: &[(&str, &str)], fetch_all: bool) -> Result<Vec<ProductType>, DefectDojoError> {
        debug!("Querying product types with filters: {:?}", filters);
        query_resources(&self.http, "product_types", filters, fetch_all).await
    }

    async fn create_product_type(&self, name: &str, description: Option<&str>) -> Result<ProductType, DefectDojoError> {
        let body = serde_json::json!({
            "name": name,
            "description": description.unwrap_or("Cluster namespace"),
        });

        let created: ProductType = self
            .http
            .post("/api/v2/product_types/", &body)
            .await
            .map_err(|e| Self::classify_create_error(name, e))?;
        info!("Product type {} created with ID {}", created.name, created.id);
        Ok(created)
    }

    async fn delete_product_type(&self, id: u64) -> Result<(), DefectDojoError> {
        self.http.delete(&format!("/api/v2/product_types/{}/", id)).await
    }

    async fn query_products(&self, filters: &[(&str, &str)], fetch_all: bool) -> Result<Vec<Product>, DefectDojoError> {
        debug!("Querying products with filters: {:?}", filters);
        query_resources(&self.http, "products", filters, fetch_all).await
    }

    async fn create_product(&self, name: &str, prod_type: u64, description: &str) -> Result<Product, DefectDojoError> {
        let body = serde_json::json!({
            "name": name,
            "description": description,
            "prod_type": prod_type,
        });

        let created: Product = self
            .http
            .post("/api/v2/products/", &body)
            .await
            .map_err(|e| Self::classify_create_error(name, e))?;
        info!("Product {} created with ID {}", created.name, created.id);
        Ok(created)
    }

    async fn query_engagements(&self, filters: &[(&str, &str)], fetch_all: bool) -> Result<Vec<Engagement>, DefectDojoError> {
        debug!("Querying engagements with filters: {:?}", filters);
        query_resources(&self.http, "engagements", filters, fetch_all).await
    }

    async fn create_engagement(&self, request: &CreateEngagementRequest) -> Result<Engagement, DefectDojoError> {
        let created: Engagement = self.http.post("/api/v2/engagements/", request).await?;
        info!("Engagement {} created for product {} (ID: {})", request.name, request.product, created.id);
        Ok(created)
    }

    async fn delete_engagement(&self, id: u64) -> Result<(), DefectDojoError> {
        self.http.delete(&format!("/api/v2/engagements/{}/", id)).await?;
        info!("Engagement {} deleted", id);
        Ok(())
    }

    async fn query_tests(&self, filters: &[(&str, &str)], fetch_all: bool) -> Result<Vec<Test>, DefectDojoError> {
        debug!("Querying tests with filters: {:?}", filters);
        query_resources(&self.http, "tests", filters, fetch_all).await
    }

    async fn import_scan(&self, request: &ImportScanRequest) -> Result<ImportScanResponse, DefectDojoError> {
        let contents = tokio::fs::read(&request.artifact).await.map_err(|e| {
            DefectDojoError::InvalidRequest(format!(
                "cannot read artifact {}: {}",
                request.artifact.display(),
                e
            ))
        })?;

        let file_name = request
            .artifact
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "scan.json".to_string());

        let mut form = Form::new();
        for (key, value) in request.form_fields() {
            form = form.text(key, value);
        }
        let part = Part::bytes(contents)
            .file_name(file_name)
            .mime_str("application/json")?;
        form = form.part("file", part);

        let response: ImportScanResponse = self.http.post_multipart("/api/v2/import-scan/", form).await?;
        info!(
            "Scan {} imported for {}/{} (test: {:?})",
            request.artifact.display(),
            request.product_type_name,
            request.product_name,
            response.test
        );
        Ok(response)
    }

    async fn get_system_settings(&self) -> Result<Option<SystemSettings>, DefectDojoError> {
        let settings: Vec<SystemSettings> = query_resources(&self.http, "system_settings", &[], false).await?;
        Ok(settings.into_iter().next())
    }

    async fn update_system_settings(&self, id: u64, update: &SystemSettingsUpdate) -> Result<SystemSettings, DefectDojoError> {
        let updated: SystemSettings = self
            .http
            .patch(&format!("/api/v2/system_settings/{}/", id), update)
            .await?;
        info!("System settings {} updated", id);
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_name_maps_to_already_exists() {
        let err = DefectDojoError::Api {
            status: StatusCode::BAD_REQUEST,
            message: r#"POST /api/v2/products/ failed: {"name":["Product with this Name already exists."]}"#.to_string(),
        };
        assert!(matches!(
            DefectDojoClient::classify_create_error("p1", err),
            DefectDojoError::AlreadyExists(name) if name == "p1"
        ));
    }

    #[test]
    fn test_other_bad_requests_are_kept() {
        let err = DefectDojoError::Api {
            status: StatusCode::BAD_REQUEST,
            message: r#"{"prod_type":["Invalid pk"]}"#.to_string(),
        };
        assert!(matches!(
            DefectDojoClient::classify_create_error("p1", err),
            DefectDojoError::Api { .. }
        ));
    }

    #[tokio::test]
    async fn test_login_rejects_empty_credentials() {
        let result = DefectDojoClient::login(
            "http://localhost:8080".to_string(),
            "",
            "secret",
            DEFAULT_TIMEOUT,
        )
        .await;
        assert!(matches!(result, Err(DefectDojoError::Authentication(_))));
    }
}
