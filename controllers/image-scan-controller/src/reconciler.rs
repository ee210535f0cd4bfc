//! Engagement reconciler.
//!
//! Per product and scan lane, compares the tag set of the lane engagement
//! with the digests currently running in the pod. An unchanged pod keeps its
//! engagement and is not scanned again; a changed pod gets its engagement
//! retired and replaced.

use crate::error::ControllerError;
use crate::inventory::PodRecord;
use crate::tag_set::{current_tags, same_elements};
use defectdojo_client::{CreateEngagementRequest, DefectDojoClientTrait, DefectDojoError, Engagement};
use tracing::{debug, error, info, warn};

/// What happened to one lane of one product
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaneOutcome {
    /// Nothing scannable in the pod; no engagement was touched
    NoTags,
    /// First engagement for the lane
    Created { engagement: u64 },
    /// Stale engagement deleted and a new one opened
    Replaced { retired: u64, engagement: u64 },
    /// Engagement tags match the running images
    Current { engagement: u64 },
    /// A new engagement was needed but could not be created
    CreateFailed,
}

impl LaneOutcome {
    /// Whether the dispatcher should run for this lane
    pub fn should_dispatch(&self) -> bool {
        matches!(self, LaneOutcome::Created { .. } | LaneOutcome::Replaced { .. })
    }
}

/// Reconciles engagements for products
pub struct EngagementReconciler<'a> {
    client: &'a dyn DefectDojoClientTrait,
}

impl<'a> EngagementReconciler<'a> {
    /// Create a new reconciler
    pub fn new(client: &'a dyn DefectDojoClientTrait) -> Self {
        Self { client }
    }

    /// Engagements of a product, across all lanes. Failure is pod-scoped.
    pub async fn engagements(&self, product: u64) -> Result<Vec<Engagement>, ControllerError> {
        let product_id = product.to_string();
        let engagements = self
            .client
            .query_engagements(&[("product", &product_id)], true)
            .await?;
        debug!("Product {} has {} engagement(s)", product, engagements.len());
        Ok(engagements)
    }

    /// Bring the `lane` engagement of `product` in line with `pod`.
    ///
    /// Only a failed delete is returned as an error, and it is fatal. An
    /// engagement that is already gone counts as retired. A failed create is logged and reported as [`LaneOutcome::CreateFailed`].
    pub async fn reconcile(
        &self,
        product: u64,
        pod: &PodRecord,
        lane: &str,
        existing: &[Engagement],
    ) -> Result<LaneOutcome, ControllerError> {
        let tags = current_tags(&pod.containers);
        let engagement = existing.iter().find(|e| e.product == product && e.name() == lane);

        if tags.is_empty() {
            warn!(
                "{}: no tags - possible no access to image, skipping lane {}",
                pod.key(),
                lane
            );
            return Ok(LaneOutcome::NoTags);
        }

        let retired = match engagement {
            Some(current) if same_elements(&current.tags, &tags) => {
                info!(
                    "{}: engagement {} ({}) is current, nothing to scan",
                    pod.key(),
                    current.id,
                    lane
                );
                return Ok(LaneOutcome::Current { engagement: current.id });
            }
            Some(stale) => {
                info!(
                    "{}: images changed, retiring engagement {} ({})",
                    pod.key(),
                    stale.id,
                    lane
                );
                match self.client.delete_engagement(stale.id).await {
                    Ok(()) => {}
                    Err(DefectDojoError::NotFound(_)) => {
                        warn!("{}: engagement {} was already deleted", pod.key(), stale.id);
                    }
                    Err(source) => {
                        return Err(ControllerError::EngagementDelete {
                            product,
                            engagement: stale.id,
                            source,
                        });
                    }
                }
                Some(stale.id)
            }
            None => None,
        };

        let request = engagement_request(product, pod, lane, tags);
        match self.client.create_engagement(&request).await {
            Ok(created) => {
                info!("{}: created engagement {} ({})", pod.key(), created.id, lane);
                Ok(match retired {
                    Some(retired) => LaneOutcome::Replaced {
                        retired,
                        engagement: created.id,
                    },
                    None => LaneOutcome::Created { engagement: created.id },
                })
            }
            Err(e) => {
                error!("{}: failed to create engagement {}: {}", pod.key(), lane, e);
                Ok(LaneOutcome::CreateFailed)
            }
        }
    }
}

/// Engagement body: one description line per container
pub fn engagement_request(product: u64, pod: &PodRecord, lane: &str, tags: Vec<String>) -> CreateEngagementRequest {
    let description = pod
        .containers
        .iter()
        .map(|c| format!("{} ({})", c.image, c.digest))
        .collect::<Vec<_>>()
        .join("\n");
    let today = chrono::Utc::now().date_naive();

    CreateEngagementRequest {
        product,
        name: lane.to_string(),
        tags,
        description,
        target_start: today,
        target_end: today,
        deduplication_on_engagement: true,
    }
}

#[cfg(test)]
#[path = "reconciler_test.rs"]
mod tests;
