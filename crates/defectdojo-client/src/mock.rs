//! Mock DefectDojoClient for unit testing
//!
//! This module provides a mock implementation of DefectDojoClientTrait that can be used
//! in unit tests without requiring a running DefectDojo instance.

use crate::dojo_trait::DefectDojoClientTrait;
use crate::error::DefectDojoError;
use crate::models::*;
use reqwest::StatusCode;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

/// Failure switches for exercising error paths
#[derive(Default)]
struct Failures {
    query_product_types: bool,
    create_product_type: bool,
    query_engagements: bool,
    create_engagement: bool,
    delete_engagement: bool,
    query_tests: HashSet<String>,
    import_scan: bool,
    create_product: HashSet<String>,
    system_settings: bool,
    // not a failure: server-side rewrite of new product type names
    product_type_suffix: Option<String>,
}

/// Mock DefectDojoClient for testing
///
/// Resources live in memory. Filters understood by the query methods are the
/// ones the controller sends: `name`, `name_exact`, `prod_type`, `product` and `tag`.
/// Deleting an engagement leaves its tests in place, so image-level dedup can
/// be observed across engagement churn.
#[derive(Clone)]
pub struct MockDefectDojoClient {
    base_url: String,
    // In-memory storage for resources
    product_types: Arc<Mutex<HashMap<u64, ProductType>>>,
    products: Arc<Mutex<HashMap<u64, Product>>>,
    engagements: Arc<Mutex<HashMap<u64, Engagement>>>,
    tests: Arc<Mutex<HashMap<u64, Test>>>,
    system_settings: Arc<Mutex<Option<SystemSettings>>>,
    // Call journal
    imports: Arc<Mutex<Vec<ImportScanRequest>>>,
    created_engagements: Arc<Mutex<Vec<CreateEngagementRequest>>>,
    deleted_engagements: Arc<Mutex<Vec<u64>>>,
    product_type_creates: Arc<Mutex<usize>>,
    product_creates: Arc<Mutex<usize>>,
    failures: Arc<Mutex<Failures>>,
    // Counter for generating IDs
    next_id: Arc<Mutex<u64>>,
}

impl MockDefectDojoClient {
    /// Create a new mock client
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            product_types: Arc::new(Mutex::new(HashMap::new())),
            products: Arc::new(Mutex::new(HashMap::new())),
            engagements: Arc::new(Mutex::new(HashMap::new())),
            tests: Arc::new(Mutex::new(HashMap::new())),
            system_settings: Arc::new(Mutex::new(None)),
            imports: Arc::new(Mutex::new(Vec::new())),
            created_engagements: Arc::new(Mutex::new(Vec::new())),
            deleted_engagements: Arc::new(Mutex::new(Vec::new())),
            product_type_creates: Arc::new(Mutex::new(0)),
            product_creates: Arc::new(Mutex::new(0)),
            failures: Arc::new(Mutex::new(Failures::default())),
            next_id: Arc::new(Mutex::new(1)),
        }
    }

    /// Generate next ID
    fn next_id(&self) -> u64 {
        let mut id = self.next_id.lock().unwrap();
        let current = *id;
        *id += 1;
        current
    }

    fn injected(what: &str) -> DefectDojoError {
        DefectDojoError::Api {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: format!("injected failure: {}", what),
        }
    }

    // Test setup

    /// Add a product type to the mock store, returning its ID
    pub fn add_product_type(&self, name: &str) -> u64 {
        let id = self.next_id();
        self.product_types.lock().unwrap().insert(
            id,
            ProductType {
                id,
                name: name.to_string(),
                description: None,
            },
        );
        id
    }

    /// Add a product to the mock store, returning its ID
    pub fn add_product(&self, name: &str, prod_type: u64) -> u64 {
        let id = self.next_id();
        self.products.lock().unwrap().insert(
            id,
            Product {
                id,
                name: name.to_string(),
                description: None,
                prod_type,
            },
        );
        id
    }

    /// Add an engagement to the mock store, returning its ID
    pub fn add_engagement(&self, product: u64, name: &str, tags: &[&str]) -> u64 {
        let id = self.next_id();
        self.engagements.lock().unwrap().insert(
            id,
            Engagement {
                id,
                name: Some(name.to_string()),
                product,
                tags: tags.iter().map(|t| t.to_string()).collect(),
                description: None,
                target_start: None,
                target_end: None,
            },
        );
        id
    }

    /// Add a test to the mock store, returning its ID
    pub fn add_test(&self, engagement: Option<u64>, scan_type: &str, tags: &[&str]) -> u64 {
        let id = self.next_id();
        self.tests.lock().unwrap().insert(
            id,
            Test {
                id,
                title: None,
                scan_type: Some(scan_type.to_string()),
                tags: tags.iter().map(|t| t.to_string()).collect(),
                engagement,
            },
        );
        id
    }

    /// Seed the system settings record
    pub fn set_system_settings(&self, settings: SystemSettings) {
        *self.system_settings.lock().unwrap() = Some(settings);
    }

    // Failure injection

    pub fn fail_product_type_queries(&self) {
        self.failures.lock().unwrap().query_product_types = true;
    }

    pub fn fail_product_type_creates(&self) {
        self.failures.lock().unwrap().create_product_type = true;
    }

    /// Store new product types under `<name><suffix>`, as a server that
    /// normalises names would
    pub fn rename_created_product_types(&self, suffix: &str) {
        self.failures.lock().unwrap().product_type_suffix = Some(suffix.to_string());
    }

    /// Make `create_product` fail with a server error for this product name
    pub fn fail_product_create(&self, name: &str) {
        self.failures.lock().unwrap().create_product.insert(name.to_string());
    }

    pub fn fail_engagement_queries(&self) {
        self.failures.lock().unwrap().query_engagements = true;
    }

    pub fn fail_engagement_creates(&self) {
        self.failures.lock().unwrap().create_engagement = true;
    }

    pub fn fail_engagement_deletes(&self) {
        self.failures.lock().unwrap().delete_engagement = true;
    }

    /// Make `query_tests` fail when filtering by this tag
    pub fn fail_test_queries_for(&self, tag: &str) {
        self.failures.lock().unwrap().query_tests.insert(tag.to_string());
    }

    pub fn fail_imports(&self) {
        self.failures.lock().unwrap().import_scan = true;
    }

    pub fn fail_system_settings(&self) {
        self.failures.lock().unwrap().system_settings = true;
    }

    // Inspection

    pub fn product_types(&self) -> Vec<ProductType> {
        let mut all: Vec<ProductType> = self.product_types.lock().unwrap().values().cloned().collect();
        all.sort_by_key(|p| p.id);
        all
    }

    pub fn products(&self) -> Vec<Product> {
        let mut all: Vec<Product> = self.products.lock().unwrap().values().cloned().collect();
        all.sort_by_key(|p| p.id);
        all
    }

    pub fn engagements(&self) -> Vec<Engagement> {
        let mut all: Vec<Engagement> = self.engagements.lock().unwrap().values().cloned().collect();
        all.sort_by_key(|e| e.id);
        all
    }

    pub fn tests(&self) -> Vec<Test> {
        let mut all: Vec<Test> = self.tests.lock().unwrap().values().cloned().collect();
        all.sort_by_key(|t| t.id);
        all
    }

    pub fn system_settings(&self) -> Option<SystemSettings> {
        self.system_settings.lock().unwrap().clone()
    }

    /// Every accepted import, in call order
    pub fn imports(&self) -> Vec<ImportScanRequest> {
        self.imports.lock().unwrap().clone()
    }

    /// Every accepted engagement creation, in call order
    pub fn created_engagements(&self) -> Vec<CreateEngagementRequest> {
        self.created_engagements.lock().unwrap().clone()
    }

    /// IDs of deleted engagements, in call order
    pub fn deleted_engagements(&self) -> Vec<u64> {
        self.deleted_engagements.lock().unwrap().clone()
    }

    /// Number of `create_product_type` calls, including rejected ones
    pub fn product_type_create_calls(&self) -> usize {
        *self.product_type_creates.lock().unwrap()
    }

    /// Number of `create_product` calls, including rejected ones
    pub fn product_create_calls(&self) -> usize {
        *self.product_creates.lock().unwrap()
    }
}

fn filter_value<'a>(filters: &'a [(&str, &str)], key: &str) -> Option<&'a str> {
    filters.iter().find(|(k, _)| *k == key).map(|(_, v)| *v)
}

fn filter_id(filters: &[(&str, &str)], key: &str) -> Option<u64> {
    filter_value(filters, key).and_then(|v| v.parse().ok())
}

#[async_trait::async_trait]
impl DefectDojoClientTrait for MockDefectDojoClient {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn validate_token(&self) -> Result<(), DefectDojoError> {
        Ok(())
    }

    async fn query_product_types(&self, filters: &[(&str, &str)], _fetch_all: bool) -> Result<Vec<ProductType>, DefectDojoError> {
        if self.failures.lock().unwrap().query_product_types {
            return Err(Self::injected("query_product_types"));
        }
        let mut results = self.product_types();
        if let Some(name) = filter_value(filters, "name") {
            results.retain(|p| p.name == name);
        }
        Ok(results)
    }

    async fn create_product_type(&self, name: &str, description: Option<&str>) -> Result<ProductType, DefectDojoError> {
        *self.product_type_creates.lock().unwrap() += 1;
        if self.failures.lock().unwrap().create_product_type {
            return Err(Self::injected("create_product_type"));
        }
        if self.product_types.lock().unwrap().values().any(|p| p.name == name) {
            return Err(DefectDojoError::AlreadyExists(name.to_string()));
        }

        let suffix = self.failures.lock().unwrap().product_type_suffix.clone().unwrap_or_default();
        let id = self.next_id();
        let product_type = ProductType {
            id,
            name: format!("{}{}", name, suffix),
            description: description.map(str::to_string),
        };
        self.product_types.lock().unwrap().insert(id, product_type.clone());
        Ok(product_type)
    }

    async fn delete_product_type(&self, id: u64) -> Result<(), DefectDojoError> {
        self.product_types
            .lock()
            .unwrap()
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| DefectDojoError::NotFound(format!("Product type {} not found", id)))
    }

    async fn query_products(&self, filters: &[(&str, &str)], _fetch_all: bool) -> Result<Vec<Product>, DefectDojoError> {
        let mut results = self.products();
        // `name` is a substring filter in DefectDojo, `name_exact` is not
        if let Some(name) = filter_value(filters, "name") {
            results.retain(|p| p.name.contains(name));
        }
        if let Some(name) = filter_value(filters, "name_exact") {
            results.retain(|p| p.name == name);
        }
        if let Some(prod_type) = filter_id(filters, "prod_type") {
            results.retain(|p| p.prod_type == prod_type);
        }
        Ok(results)
    }

    async fn create_product(&self, name: &str, prod_type: u64, description: &str) -> Result<Product, DefectDojoError> {
        *self.product_creates.lock().unwrap() += 1;
        if self.failures.lock().unwrap().create_product.contains(name) {
            return Err(Self::injected("create_product"));
        }
        if !self.product_types.lock().unwrap().contains_key(&prod_type) {
            return Err(DefectDojoError::Api {
                status: StatusCode::BAD_REQUEST,
                message: format!("Invalid pk \"{}\" - object does not exist.", prod_type),
            });
        }
        // DefectDojo product names are unique across all product types
        if self.products.lock().unwrap().values().any(|p| p.name == name) {
            return Err(DefectDojoError::AlreadyExists(name.to_string()));
        }

        let id = self.next_id();
        let product = Product {
            id,
            name: name.to_string(),
            description: Some(description.to_string()),
            prod_type,
        };
        self.products.lock().unwrap().insert(id, product.clone());
        Ok(product)
    }

    async fn query_engagements(&self, filters: &[(&str, &str)], _fetch_all: bool) -> Result<Vec<Engagement>, DefectDojoError> {
        if self.failures.lock().unwrap().query_engagements {
            return Err(Self::injected("query_engagements"));
        }
        let mut results = self.engagements();
        if let Some(product) = filter_id(filters, "product") {
            results.retain(|e| e.product == product);
        }
        if let Some(name) = filter_value(filters, "name") {
            results.retain(|e| e.name() == name);
        }
        Ok(results)
    }

    async fn create_engagement(&self, request: &CreateEngagementRequest) -> Result<Engagement, DefectDojoError> {
        if self.failures.lock().unwrap().create_engagement {
            return Err(Self::injected("create_engagement"));
        }

        let id = self.next_id();
        let engagement = Engagement {
            id,
            name: Some(request.name.clone()),
            product: request.product,
            tags: request.tags.clone(),
            description: Some(request.description.clone()),
            target_start: Some(request.target_start),
            target_end: Some(request.target_end),
        };
        self.engagements.lock().unwrap().insert(id, engagement.clone());
        self.created_engagements.lock().unwrap().push(request.clone());
        Ok(engagement)
    }

    async fn delete_engagement(&self, id: u64) -> Result<(), DefectDojoError> {
        if self.failures.lock().unwrap().delete_engagement {
            return Err(Self::injected("delete_engagement"));
        }
        self.engagements
            .lock()
            .unwrap()
            .remove(&id)
            .ok_or_else(|| DefectDojoError::NotFound(format!("Engagement {} not found", id)))?;
        self.deleted_engagements.lock().unwrap().push(id);
        Ok(())
    }

    async fn query_tests(&self, filters: &[(&str, &str)], _fetch_all: bool) -> Result<Vec<Test>, DefectDojoError> {
        let tag = filter_value(filters, "tag");
        if let Some(tag) = tag {
            if self.failures.lock().unwrap().query_tests.contains(tag) {
                return Err(Self::injected("query_tests"));
            }
        }

        let mut results = self.tests();
        if let Some(tag) = tag {
            results.retain(|t| t.tags.iter().any(|x| x == tag));
        }
        if let Some(engagement) = filter_id(filters, "engagement") {
            results.retain(|t| t.engagement == Some(engagement));
        }
        Ok(results)
    }

    async fn import_scan(&self, request: &ImportScanRequest) -> Result<ImportScanResponse, DefectDojoError> {
        if self.failures.lock().unwrap().import_scan {
            return Err(Self::injected("import_scan"));
        }
        if !request.artifact.exists() {
            return Err(DefectDojoError::InvalidRequest(format!(
                "cannot read artifact {}",
                request.artifact.display()
            )));
        }

        // auto_create_context: resolve the product and engagement by name
        let product = self
            .products()
            .into_iter()
            .find(|p| p.name == request.product_name)
            .ok_or_else(|| DefectDojoError::NotFound(format!("Product {} not found", request.product_name)))?;
        let engagement_id = match self
            .engagements()
            .into_iter()
            .find(|e| e.product == product.id && e.name() == request.engagement_name)
        {
            Some(engagement) => engagement.id,
            None => self.add_engagement(product.id, &request.engagement_name, &[]),
        };

        let tag = request
            .form_fields()
            .into_iter()
            .find(|(k, _)| *k == "tags")
            .map(|(_, v)| v)
            .unwrap_or_default();
        let id = self.next_id();
        self.tests.lock().unwrap().insert(
            id,
            Test {
                id,
                title: Some(request.test_title.clone()),
                scan_type: Some(request.scan_type.clone()),
                tags: vec![tag],
                engagement: Some(engagement_id),
            },
        );
        self.imports.lock().unwrap().push(request.clone());

        Ok(ImportScanResponse {
            test: Some(id),
            engagement_id: Some(engagement_id),
            product_id: Some(product.id),
        })
    }

    async fn get_system_settings(&self) -> Result<Option<SystemSettings>, DefectDojoError> {
        if self.failures.lock().unwrap().system_settings {
            return Err(Self::injected("get_system_settings"));
        }
        Ok(self.system_settings())
    }

    async fn update_system_settings(&self, id: u64, update: &SystemSettingsUpdate) -> Result<SystemSettings, DefectDojoError> {
        if self.failures.lock().unwrap().system_settings {
            return Err(Self::injected("update_system_settings"));
        }
        let mut guard = self.system_settings.lock().unwrap();
        match guard.as_mut() {
            Some(settings) if settings.id == id => {
                settings.enable_deduplication = update.enable_deduplication;
                settings.delete_duplicates = update.delete_duplicates;
                settings.max_dupes = Some(update.max_dupes);
                Ok(settings.clone())
            }
            _ => Err(DefectDojoError::NotFound(format!("System settings {} not found", id))),
        }
    }
}
