use crate::projectors;
use crate::registry::{IdentityField, ResourceDescriptor, TimeoutClass};

/// Default registry contents (spec §4.15): the built-in kinds this core
/// mirrors out of the box. Cluster-scoped kinds sync first (cheap, and
/// everything else often references them); large-payload namespaced kinds
/// (Pod/ConfigMap/Secret/Event) sync last and get the extended timeout.
pub fn default_descriptors() -> Vec<ResourceDescriptor> {
    vec![
        ResourceDescriptor {
            name: "Namespace",
            kind: "Namespace",
            api_group: "",
            api_version: "v1",
            plural: "namespaces",
            namespaced: false,
            identity_field: IdentityField::Uid,
            store_binding: "namespaces",
            projector: projectors::project_namespace,
            sync_priority: 0,
            timeout_class: TimeoutClass::Normal,
        },
        ResourceDescriptor {
            name: "Node",
            kind: "Node",
            api_group: "",
            api_version: "v1",
            plural: "nodes",
            namespaced: false,
            identity_field: IdentityField::Uid,
            store_binding: "nodes",
            projector: projectors::project_node,
            sync_priority: 1,
            timeout_class: TimeoutClass::Normal,
        },
        ResourceDescriptor {
            name: "CustomResourceDefinition",
            kind: "CustomResourceDefinition",
            api_group: "apiextensions.k8s.io",
            api_version: "v1",
            plural: "customresourcedefinitions",
            namespaced: false,
            identity_field: IdentityField::Uid,
            store_binding: "customresourcedefinitions",
            projector: projectors::project_crd,
            sync_priority: 2,
            timeout_class: TimeoutClass::Normal,
        },
        ResourceDescriptor {
            name: "Deployment",
            kind: "Deployment",
            api_group: "apps",
            api_version: "v1",
            plural: "deployments",
            namespaced: true,
            identity_field: IdentityField::Uid,
            store_binding: "deployments",
            projector: projectors::project_deployment,
            sync_priority: 10,
            timeout_class: TimeoutClass::Normal,
        },
        ResourceDescriptor {
            name: "StatefulSet",
            kind: "StatefulSet",
            api_group: "apps",
            api_version: "v1",
            plural: "statefulsets",
            namespaced: true,
            identity_field: IdentityField::Uid,
            store_binding: "statefulsets",
            projector: projectors::project_stateful_set,
            sync_priority: 11,
            timeout_class: TimeoutClass::Normal,
        },
        ResourceDescriptor {
            name: "DaemonSet",
            kind: "DaemonSet",
            api_group: "apps",
            api_version: "v1",
            plural: "daemonsets",
            namespaced: true,
            identity_field: IdentityField::Uid,
            store_binding: "daemonsets",
            projector: projectors::project_daemon_set,
            sync_priority: 12,
            timeout_class: TimeoutClass::Normal,
        },
        ResourceDescriptor {
            name: "Service",
            kind: "Service",
            api_group: "",
            api_version: "v1",
            plural: "services",
            namespaced: true,
            identity_field: IdentityField::Uid,
            store_binding: "services",
            projector: projectors::project_service,
            sync_priority: 13,
            timeout_class: TimeoutClass::Normal,
        },
        ResourceDescriptor {
            name: "Pod",
            kind: "Pod",
            api_group: "",
            api_version: "v1",
            plural: "pods",
            namespaced: true,
            identity_field: IdentityField::Uid,
            store_binding: "pods",
            projector: projectors::project_pod,
            sync_priority: 20,
            timeout_class: TimeoutClass::Extended,
        },
        ResourceDescriptor {
            name: "ConfigMap",
            kind: "ConfigMap",
            api_group: "",
            api_version: "v1",
            plural: "configmaps",
            namespaced: true,
            identity_field: IdentityField::Uid,
            store_binding: "configmaps",
            projector: projectors::project_config_map,
            sync_priority: 21,
            timeout_class: TimeoutClass::Extended,
        },
        ResourceDescriptor {
            name: "Secret",
            kind: "Secret",
            api_group: "",
            api_version: "v1",
            plural: "secrets",
            namespaced: true,
            identity_field: IdentityField::Uid,
            store_binding: "secrets",
            projector: projectors::project_secret,
            sync_priority: 22,
            timeout_class: TimeoutClass::Extended,
        },
        ResourceDescriptor {
            name: "Event",
            kind: "Event",
            api_group: "",
            api_version: "v1",
            plural: "events",
            namespaced: true,
            identity_field: IdentityField::Uid,
            store_binding: "events",
            projector: projectors::project_event,
            sync_priority: 30,
            timeout_class: TimeoutClass::Extended,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Registry;

    #[test]
    fn default_descriptors_form_a_valid_registry() {
        let registry = Registry::build(default_descriptors()).expect("default registry must be valid");
        assert_eq!(registry.all().len(), 11);
    }

    #[test]
    fn cluster_scoped_kinds_sync_before_namespaced_ones() {
        let registry = Registry::build(default_descriptors()).unwrap();
        let order: Vec<&str> = registry.iterate_sorted().iter().map(|d| d.plural).collect();
        let namespaces_idx = order.iter().position(|&k| k == "namespaces").unwrap();
        let pods_idx = order.iter().position(|&k| k == "pods").unwrap();
        assert!(namespaces_idx < pods_idx);
    }
}
