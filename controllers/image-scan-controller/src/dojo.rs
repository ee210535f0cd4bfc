//! DefectDojo client wrapper that retries transient failures.
//!
//! Reads, deletes and name-keyed creates are retried with Fibonacci backoff.
//! Engagement creation and scan import are not idempotent and go through once.

use crate::backoff::RetryPolicy;
use defectdojo_client::{
    CreateEngagementRequest, DefectDojoClientTrait, DefectDojoError, Engagement, ImportScanRequest,
    ImportScanResponse, Product, ProductType, SystemSettings, SystemSettingsUpdate, Test,
};

fn transient(e: &DefectDojoError) -> bool {
    e.is_transient()
}

/// Decorates any [`DefectDojoClientTrait`] with bounded retries
pub struct RetryingDojoClient {
    inner: Box<dyn DefectDojoClientTrait + Send + Sync>,
    policy: RetryPolicy,
}

impl RetryingDojoClient {
    /// Wrap `inner`, retrying its transient failures with `policy`
    pub fn new(inner: Box<dyn DefectDojoClientTrait + Send + Sync>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait::async_trait]
impl DefectDojoClientTrait for RetryingDojoClient {
    fn base_url(&self) -> &str {
        self.inner.base_url()
    }

    async fn validate_token(&self) -> Result<(), DefectDojoError> {
        self.policy
            .retry("validate token", transient, || self.inner.validate_token())
            .await
    }

    async fn query_product_types(&self, filters: &[(&str, &str)], fetch_all: bool) -> Result<Vec<ProductType>, DefectDojoError> {
        self.policy
            .retry("list product types", transient, || self.inner.query_product_types(filters, fetch_all))
            .await
    }

    async fn create_product_type(&self, name: &str, description: Option<&str>) -> Result<ProductType, DefectDojoError> {
        self.policy
            .retry("create product type", transient, || self.inner.create_product_type(name, description))
            .await
    }

    async fn delete_product_type(&self, id: u64) -> Result<(), DefectDojoError> {
        self.policy
            .retry("delete product type", transient, || self.inner.delete_product_type(id))
            .await
    }

    async fn query_products(&self, filters: &[(&str, &str)], fetch_all: bool) -> Result<Vec<Product>, DefectDojoError> {
        self.policy
            .retry("list products", transient, || self.inner.query_products(filters, fetch_all))
            .await
    }

    async fn create_product(&self, name: &str, prod_type: u64, description: &str) -> Result<Product, DefectDojoError> {
        self.policy
            .retry("create product", transient, || self.inner.create_product(name, prod_type, description))
            .await
    }

    async fn query_engagements(&self, filters: &[(&str, &str)], fetch_all: bool) -> Result<Vec<Engagement>, DefectDojoError> {
        self.policy
            .retry("list engagements", transient, || self.inner.query_engagements(filters, fetch_all))
            .await
    }

    async fn create_engagement(&self, request: &CreateEngagementRequest) -> Result<Engagement, DefectDojoError> {
        self.inner.create_engagement(request).await
    }

    async fn delete_engagement(&self, id: u64) -> Result<(), DefectDojoError> {
        self.policy
            .retry("delete engagement", transient, || self.inner.delete_engagement(id))
            .await
    }

    async fn query_tests(&self, filters: &[(&str, &str)], fetch_all: bool) -> Result<Vec<Test>, DefectDojoError> {
        self.policy
            .retry("list tests", transient, || self.inner.query_tests(filters, fetch_all))
            .await
    }

    async fn import_scan(&self, request: &ImportScanRequest) -> Result<ImportScanResponse, DefectDojoError> {
        self.inner.import_scan(request).await
    }

    async fn get_system_settings(&self) -> Result<Option<SystemSettings>, DefectDojoError> {
        self.policy
            .retry("read system settings", transient, || self.inner.get_system_settings())
            .await
    }

    async fn update_system_settings(&self, id: u64, update: &SystemSettingsUpdate) -> Result<SystemSettings, DefectDojoError> {
        self.policy
            .retry("update system settings", transient, || self.inner.update_system_settings(id, update))
            .await
    }
}
