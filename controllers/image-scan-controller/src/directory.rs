//! Tracking-system directory.
//!
//! Maps namespaces to DefectDojo product types and pods to products. The
//! product type map is built once per pass and read-only afterwards.

use crate::error::ControllerError;
use defectdojo_client::{DefectDojoClientTrait, DefectDojoError, Product};
use std::collections::HashMap;
use tracing::{debug, info};

/// Namespace name to product type id, for one pass
#[derive(Debug, Clone, Default)]
pub struct Directory {
    product_types: HashMap<String, u64>,
}

impl Directory {
    /// List product types once and create one for every namespace missing.
    ///
    /// Any failure here is fatal for the run.
    pub async fn build(client: &dyn DefectDojoClientTrait, namespaces: &[String]) -> Result<Self, ControllerError> {
        let existing = client
            .query_product_types(&[], true)
            .await
            .map_err(ControllerError::Directory)?;

        let mut product_types: HashMap<String, u64> =
            existing.into_iter().map(|pt| (pt.name, pt.id)).collect();
        debug!("Found {} existing product type(s)", product_types.len());

        for namespace in namespaces {
            if product_types.contains_key(namespace) {
                continue;
            }
            let description = format!("Workloads of namespace {}", namespace);
            let created = client
                .create_product_type(namespace, Some(&description))
                .await
                .map_err(ControllerError::Directory)?;
            info!("Created product type {} (ID: {})", created.name, created.id);
            product_types.insert(namespace.clone(), created.id);
        }

        Ok(Self { product_types })
    }

    /// Product type id of `namespace`, if the directory knows it
    pub fn product_type(&self, namespace: &str) -> Option<u64> {
        self.product_types.get(namespace).copied()
    }
}

/// Create the product for a pod, or resolve the existing one by name.
///
/// A name clash is settled by a lookup filtered by name and product type that
/// must return exactly one product. Every failure here is pod-scoped.
pub async fn ensure_product(
    client: &dyn DefectDojoClientTrait,
    name: &str,
    prod_type: u64,
    description: &str,
) -> Result<Product, ControllerError> {
    match client.create_product(name, prod_type, description).await {
        Ok(product) => {
            info!("Created product {} (ID: {})", product.name, product.id);
            Ok(product)
        }
        Err(DefectDojoError::AlreadyExists(_)) => {
            debug!("Product {} already exists, looking it up", name);
            let prod_type_id = prod_type.to_string();
            let found = client
                .query_products(&[("name_exact", name), ("prod_type", &prod_type_id)], true)
                .await
                .map_err(|e| ControllerError::ProductResolution {
                    name: name.to_string(),
                    reason: format!("lookup failed: {}", e),
                })?;

            let mut matches: Vec<Product> = found.into_iter().filter(|p| p.name == name).collect();
            match matches.len() {
                1 => Ok(matches.remove(0)),
                0 => Err(ControllerError::ProductResolution {
                    name: name.to_string(),
                    reason: format!("exists but not under product type {}", prod_type),
                }),
                n => Err(ControllerError::ProductResolution {
                    name: name.to_string(),
                    reason: format!("{} products share this name", n),
                }),
            }
        }
        Err(e) => Err(ControllerError::ProductResolution {
            name: name.to_string(),
            reason: e.to_string(),
        }),
    }
}
