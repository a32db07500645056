//! Duplicate detection by Mirrored-Record Tag
//!
//! An encounter counts as mirrored once its linking resource exists. Leaves and
//! the encounter itself may carry the tag after a partial write, but without
//! the linking resource the composite is incomplete and must be retried.

use super::mapping::{has_tag, linked_encounter, tag_query, tenant_tag_system, LINK_RESOURCE_TYPE};
use crate::adapters::TargetStore;
use crate::domain::{Result, SourceId, TargetResourceId, TenantId};
use std::sync::Arc;

/// A composite record found in the target store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirroredRecord {
    pub link_id: TargetResourceId,

    /// Encounter the linking resource points at, when it carries one
    pub target_encounter_id: Option<TargetResourceId>,
}

/// Answers "has this source encounter already been mirrored?"
#[derive(Clone)]
pub struct DuplicateGuard {
    target: Arc<dyn TargetStore>,
    tag_system: String,
}

impl DuplicateGuard {
    pub fn new(target: Arc<dyn TargetStore>, tag_system: impl Into<String>) -> Self {
        Self {
            target,
            tag_system: tag_system.into(),
        }
    }

    /// Whether a linking resource tagged with `source_id` exists for `tenant`
    pub async fn already_mirrored(&self, tenant: &TenantId, source_id: &SourceId) -> Result<bool> {
        Ok(self.find_link(tenant, source_id).await?.is_some())
    }

    /// The linking resource tagged with `source_id` for `tenant`, if any
    ///
    /// A deleted linking resource makes the encounter eligible again; nothing
    /// else is reconciled.
    pub async fn find_link(
        &self,
        tenant: &TenantId,
        source_id: &SourceId,
    ) -> Result<Option<MirroredRecord>> {
        let tag_system = tenant_tag_system(&self.tag_system, tenant);
        let matches = self
            .target
            .search_resources(tenant, LINK_RESOURCE_TYPE, &tag_query(&tag_system, source_id))
            .await?;

        // Servers that ignore `_tag` return unfiltered results
        let found = matches
            .iter()
            .filter(|r| has_tag(r, &tag_system, source_id))
            .filter_map(|r| {
                let link_id = TargetResourceId::new(r["id"].as_str()?).ok()?;
                Some(MirroredRecord {
                    link_id,
                    target_encounter_id: linked_encounter(r),
                })
            })
            .collect::<Vec<_>>();

        if found.len() > 1 {
            tracing::warn!(
                tenant_id = %tenant,
                source_id = %source_id,
                count = found.len(),
                "Multiple linking resources carry the same source tag"
            );
        }
        Ok(found.into_iter().next())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TargetError;
    use async_trait::async_trait;
    use serde_json::{json, Value};

    /// One shared store whose search ignores `_tag`
    struct UnfilteredStore(Vec<Value>);

    #[async_trait]
    impl TargetStore for UnfilteredStore {
        async fn create_resource(
            &self,
            _: &TenantId,
            _: &str,
            body: &Value,
        ) -> std::result::Result<Value, TargetError> {
            Ok(body.clone())
        }

        async fn read_resource(
            &self,
            _: &TenantId,
            t: &str,
            id: &str,
        ) -> std::result::Result<Value, TargetError> {
            Err(TargetError::NotFound(format!("{t}/{id}")))
        }

        async fn update_resource(
            &self,
            _: &TenantId,
            _: &str,
            _: &str,
            body: &Value,
        ) -> std::result::Result<Value, TargetError> {
            Ok(body.clone())
        }

        async fn search_resources(
            &self,
            _: &TenantId,
            _: &str,
            _: &[(String, String)],
        ) -> std::result::Result<Vec<Value>, TargetError> {
            Ok(self.0.clone())
        }

        async fn execute_bundle(
            &self,
            _: &TenantId,
            bundle: &Value,
        ) -> std::result::Result<Value, TargetError> {
            Ok(bundle.clone())
        }
    }

    fn guard() -> DuplicateGuard {
        let link = json!({
            "resourceType": "List",
            "id": "list-1",
            "meta": {"tag": [{"system": "original-source-id/acme", "code": "enc-77"}]},
            "encounter": {"reference": "Encounter/te-1"},
        });
        DuplicateGuard::new(Arc::new(UnfilteredStore(vec![link])), "original-source-id")
    }

    #[tokio::test]
    async fn test_link_found_for_owning_tenant() {
        let acme = TenantId::new("acme").unwrap();
        let enc = SourceId::new("enc-77").unwrap();

        let found = guard().find_link(&acme, &enc).await.unwrap().unwrap();
        assert_eq!(found.link_id.as_str(), "list-1");
        assert_eq!(
            found.target_encounter_id.map(TargetResourceId::into_inner).as_deref(),
            Some("te-1")
        );
        assert!(guard().already_mirrored(&acme, &enc).await.unwrap());
    }

    #[tokio::test]
    async fn test_other_tenants_link_is_not_a_duplicate() {
        let globex = TenantId::new("globex").unwrap();
        let acme = TenantId::new("acme").unwrap();

        assert!(!guard()
            .already_mirrored(&globex, &SourceId::new("enc-77").unwrap())
            .await
            .unwrap());
        assert!(!guard()
            .already_mirrored(&acme, &SourceId::new("enc-78").unwrap())
            .await
            .unwrap());
    }
}
