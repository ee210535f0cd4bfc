//! DefectDojo API models
//!
//! These models match the DefectDojo v2 REST API serializers.
//! Only the fields the scan controller reads are modelled; everything else
//! in the payloads is ignored on deserialization.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Product type (one per cluster namespace)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductType {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// Product (one per pod, scoped to a product type)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub prod_type: u64,
}

/// Engagement for one product and one scan lane
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Engagement {
    pub id: u64,
    #[serde(default)]
    pub name: Option<String>,
    pub product: u64,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub target_start: Option<NaiveDate>,
    #[serde(default)]
    pub target_end: Option<NaiveDate>,
}

impl Engagement {
    /// Engagement name, empty when DefectDojo returned none
    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or_default()
    }
}

/// Test (one imported scan of one image)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Test {
    pub id: u64,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub scan_type: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub engagement: Option<u64>,
}

impl Test {
    /// Whether this test records a scan of `image_digest` by `scan_type`
    pub fn covers(&self, scan_type: &str, image_digest: &str) -> bool {
        self.scan_type.as_deref() == Some(scan_type) && self.tags.iter().any(|t| t == image_digest)
    }
}

/// Global DefectDojo system settings (deduplication knobs only)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemSettings {
    pub id: u64,
    #[serde(default)]
    pub enable_deduplication: bool,
    #[serde(default)]
    pub delete_duplicates: bool,
    #[serde(default)]
    pub max_dupes: Option<u32>,
}

/// Request body for updating the deduplication system settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SystemSettingsUpdate {
    pub enable_deduplication: bool,
    pub delete_duplicates: bool,
    pub max_dupes: u32,
}

/// Request body for creating an engagement
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateEngagementRequest {
    pub product: u64,
    pub name: String,
    pub tags: Vec<String>,
    pub description: String,
    pub target_start: NaiveDate,
    pub target_end: NaiveDate,
    pub deduplication_on_engagement: bool,
}

/// Scan result import request
///
/// `auto_create_context` lets DefectDojo resolve the engagement by name
/// under the named product and product type.
#[derive(Debug, Clone)]
pub struct ImportScanRequest {
    pub product_type_name: String,
    pub product_name: String,
    pub engagement_name: String,
    pub test_title: String,
    pub scan_type: String,
    pub image_digest: String,
    pub scan_date: NaiveDate,
    pub artifact: PathBuf,
}

impl ImportScanRequest {
    /// Form fields sent alongside the artifact
    pub fn form_fields(&self) -> Vec<(&'static str, String)> {
        let tag = if self.image_digest.is_empty() {
            "unknown".to_string()
        } else {
            self.image_digest.clone()
        };

        vec![
            ("product_type_name", self.product_type_name.clone()),
            ("product_name", self.product_name.clone()),
            ("engagement_name", self.engagement_name.clone()),
            ("test_title", self.test_title.clone()),
            ("scan_type", self.scan_type.clone()),
            ("tags", tag),
            ("scan_date", self.scan_date.format("%Y-%m-%d").to_string()),
            ("active", "true".to_string()),
            ("verified", "true".to_string()),
            ("close_old_findings", "true".to_string()),
            ("close_old_findings_product_scope", "true".to_string()),
            ("deduplication_on_engagement", "true".to_string()),
            ("push_to_jira", "false".to_string()),
            ("minimum_severity", "Info".to_string()),
            ("create_finding_groups_for_all_findings", "false".to_string()),
            ("auto_create_context", "true".to_string()),
        ]
    }
}

/// Response of a successful scan import
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportScanResponse {
    #[serde(default)]
    pub test: Option<u64>,
    #[serde(default)]
    pub engagement_id: Option<u64>,
    #[serde(default)]
    pub product_id: Option<u64>,
}

/// Response of the token authentication endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthToken {
    pub token: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_test_covers_requires_scan_type_and_tag() {
        let test = Test {
            id: 1,
            title: Some("app".to_string()),
            scan_type: Some("Anchore Grype".to_string()),
            tags: vec!["quay.io/org/app@sha256:aa".to_string()],
            engagement: Some(3),
        };

        assert!(test.covers("Anchore Grype", "quay.io/org/app@sha256:aa"));
        assert!(!test.covers("Trivy Scan", "quay.io/org/app@sha256:aa"));
        assert!(!test.covers("Anchore Grype", "quay.io/org/app@sha256:bb"));
    }

    #[test]
    fn test_import_form_tags_unknown_digest() {
        let request = ImportScanRequest {
            product_type_name: "ns1".to_string(),
            product_name: "p1".to_string(),
            engagement_name: "Grype".to_string(),
            test_title: "app".to_string(),
            scan_type: "Anchore Grype".to_string(),
            image_digest: String::new(),
            scan_date: NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
            artifact: PathBuf::from("/tmp/a.json"),
        };

        let fields = request.form_fields();
        assert!(fields.contains(&("tags", "unknown".to_string())));
        assert!(fields.contains(&("scan_date", "2024-05-01".to_string())));
        assert!(fields.contains(&("auto_create_context", "true".to_string())));
    }

    #[test]
    fn test_engagement_deserializes_without_optional_fields() {
        let engagement: Engagement =
            serde_json::from_str(r#"{"id": 7, "product": 2, "name": "Grype"}"#).unwrap();
        assert_eq!(engagement.name(), "Grype");
        assert!(engagement.tags.is_empty());
    }
}
