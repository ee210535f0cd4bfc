//! DefectDojoClient trait for mocking
//!
//! This trait abstracts the DefectDojoClient to enable mocking in unit tests.
//! The concrete DefectDojoClient implements this trait, and tests can use mock implementations.

use crate::error::DefectDojoError;
use crate::models::*;

/// Trait for DefectDojo API client operations
///
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
#[async_trait::async_trait]
pub trait DefectDojoClientTrait: Send + Sync {
    /// Get the base URL
    fn base_url(&self) -> &str;

    /// Validate the API token
    async fn validate_token(&self) -> Result<(), DefectDojoError>;

    // Product types
    async fn query_product_types(&self, filters: &[(&str, &str)], fetch_all: bool) -> Result<Vec<ProductType>, DefectDojoError>;
    async fn create_product_type(&self, name: &str, description: Option<&str>) -> Result<ProductType, DefectDojoError>;
    async fn delete_product_type(&self, id: u64) -> Result<(), DefectDojoError>;

    // Products
    async fn query_products(&self, filters: &[(&str, &str)], fetch_all: bool) -> Result<Vec<Product>, DefectDojoError>;
    /// Create a product; a name clash is reported as [`DefectDojoError::AlreadyExists`]
    async fn create_product(&self, name: &str, prod_type: u64, description: &str) -> Result<Product, DefectDojoError>;

    // Engagements
    async fn query_engagements(&self, filters: &[(&str, &str)], fetch_all: bool) -> Result<Vec<Engagement>, DefectDojoError>;
    async fn create_engagement(&self, request: &CreateEngagementRequest) -> Result<Engagement, DefectDojoError>;
    async fn delete_engagement(&self, id: u64) -> Result<(), DefectDojoError>;

    // Tests and imports
    async fn query_tests(&self, filters: &[(&str, &str)], fetch_all: bool) -> Result<Vec<Test>, DefectDojoError>;
    async fn import_scan(&self, request: &ImportScanRequest) -> Result<ImportScanResponse, DefectDojoError>;

    // System settings
    async fn get_system_settings(&self) -> Result<Option<SystemSettings>, DefectDojoError>;
    async fn update_system_settings(&self, id: u64, update: &SystemSettingsUpdate) -> Result<SystemSettings, DefectDojoError>;
}
