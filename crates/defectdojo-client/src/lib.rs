//! DefectDojo REST API Client
//!
//! A Rust client library for the parts of the DefectDojo v2 REST API used to
//! mirror cluster workloads: product types, products, engagements, tests and
//! scan imports.
//!
//! # Example
//!
//! ```no_run
//! use defectdojo_client::{DefectDojoClient, DefectDojoClientTrait};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = DefectDojoClient::new(
//!     "http://defectdojo:8080".to_string(),
//!     "your-api-token".to_string(),
//! )?;
//!
//! // List every product type
//! let product_types = client.query_product_types(&[], true).await?;
//!
//! // Find the engagements of one product
//! let engagements = client.query_engagements(&[("product", "42")], true).await?;
//! # let _ = (product_types, engagements);
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod common;
pub mod error;
pub mod models;
#[path = "trait.rs"]
pub mod dojo_trait;
#[cfg(feature = "test-util")]
pub mod mock;

pub use client::DefectDojoClient;
pub use common::{HttpClient, PaginatedResponse};
pub use dojo_trait::DefectDojoClientTrait;
pub use error::DefectDojoError;
pub use models::*;
#[cfg(feature = "test-util")]
pub use mock::MockDefectDojoClient;
