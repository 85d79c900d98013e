use std::collections::HashMap;

use kube::core::{ApiResource, GroupVersionKind};

use crate::error::{Error, Result};
use crate::store::StoredResource;

/// Normal kinds get the standard request deadline; extended kinds (large
/// list payloads — ConfigMap, Secret, Event, Pod) get a longer one (spec §5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutClass {
    Normal,
    Extended,
}

/// Which field on the projected record uniquely identifies an object within
/// its kind (spec §3 `identityField`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityField {
    Uid,
    Name,
}

impl IdentityField {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdentityField::Uid => "uid",
            IdentityField::Name => "name",
        }
    }
}

pub type Projector = fn(&kube::core::DynamicObject) -> StoredResource;

/// One row per supported Kubernetes kind, built once at startup and frozen
/// (spec §3 `ResourceDescriptor`, §4.1).
#[derive(Clone)]
pub struct ResourceDescriptor {
    pub name: &'static str,
    pub kind: &'static str,
    pub api_group: &'static str,
    pub api_version: &'static str,
    pub plural: &'static str,
    pub namespaced: bool,
    pub identity_field: IdentityField,
    /// Name of the Mongo collection this kind is stored under.
    pub store_binding: &'static str,
    pub projector: Projector,
    pub sync_priority: i32,
    pub timeout_class: TimeoutClass,
}

impl ResourceDescriptor {
    pub fn api_resource(&self) -> ApiResource {
        let gvk = if self.api_group.is_empty() {
            GroupVersionKind::gvk("", self.api_version, self.kind)
        } else {
            GroupVersionKind::gvk(self.api_group, self.api_version, self.kind)
        };
        ApiResource::from_gvk_with_plural(&gvk, self.plural)
    }
}

/// Authoritative, immutable table of every registered kind plus O(1) lookup
/// by plural (spec §4.1).
pub struct Registry {
    descriptors: Vec<ResourceDescriptor>,
    by_plural: HashMap<&'static str, usize>,
}

impl Registry {
    /// Builds and validates the registry. Fails if plural or
    /// `(identityField, storeBinding)` uniqueness is violated (spec §3
    /// invariants).
    pub fn build(descriptors: Vec<ResourceDescriptor>) -> Result<Self> {
        let mut by_plural = HashMap::with_capacity(descriptors.len());
        let mut seen_identity = HashMap::new();
        for (idx, d) in descriptors.iter().enumerate() {
            if by_plural.insert(d.plural, idx).is_some() {
                return Err(Error::Registry(format!(
                    "duplicate plural in registry: {}",
                    d.plural
                )));
            }
            let key = (d.identity_field.as_str(), d.store_binding);
            if let Some(prev) = seen_identity.insert(key, d.plural) {
                return Err(Error::Registry(format!(
                    "duplicate (identityField, storeBinding) for {} and {}",
                    prev, d.plural
                )));
            }
        }
        Ok(Self {
            descriptors,
            by_plural,
        })
    }

    pub fn lookup_by_plural(&self, plural: &str) -> Option<&ResourceDescriptor> {
        self.by_plural.get(plural).map(|&idx| &self.descriptors[idx])
    }

    /// Ascending `syncPriority`, stable tiebreak by plural (spec §4.1).
    pub fn iterate_sorted(&self) -> Vec<&ResourceDescriptor> {
        let mut sorted: Vec<&ResourceDescriptor> = self.descriptors.iter().collect();
        sorted.sort_by(|a, b| a.sync_priority.cmp(&b.sync_priority).then(a.plural.cmp(b.plural)));
        sorted
    }

    pub fn all(&self) -> &[ResourceDescriptor] {
        &self.descriptors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(plural: &'static str, priority: i32) -> ResourceDescriptor {
        ResourceDescriptor {
            name: plural,
            kind: plural,
            api_group: "",
            api_version: "v1",
            plural,
            namespaced: true,
            identity_field: IdentityField::Uid,
            store_binding: plural,
            projector: crate::projectors::project_generic,
            sync_priority: priority,
            timeout_class: TimeoutClass::Normal,
        }
    }

    #[test]
    fn rejects_duplicate_plural() {
        let err = Registry::build(vec![descriptor("pods", 1), descriptor("pods", 2)]);
        assert!(err.is_err());
    }

    #[test]
    fn rejects_duplicate_identity_and_binding() {
        let mut a = descriptor("pods", 1);
        let mut b = descriptor("nodes", 2);
        a.store_binding = "shared";
        b.store_binding = "shared";
        a.identity_field = IdentityField::Uid;
        b.identity_field = IdentityField::Uid;
        assert!(Registry::build(vec![a, b]).is_err());
    }

    #[test]
    fn iterate_sorted_orders_by_priority_then_plural() {
        let reg = Registry::build(vec![
            descriptor("zetas", 10),
            descriptor("alphas", 10),
            descriptor("nodes", 1),
        ])
        .unwrap();
        let order: Vec<&str> = reg.iterate_sorted().iter().map(|d| d.plural).collect();
        assert_eq!(order, vec!["nodes", "alphas", "zetas"]);
    }

    #[test]
    fn lookup_by_plural_is_found() {
        let reg = Registry::build(vec![descriptor("pods", 1)]).unwrap();
        assert!(reg.lookup_by_plural("pods").is_some());
        assert!(reg.lookup_by_plural("widgets").is_none());
    }
}
