use bson::{doc, Document};
use kube::core::DynamicObject;
use kube::ResourceExt;
use serde_json::Value;

use crate::store::{document::to_raw_document, StoredResource};

/// Shared projection of the fields every kind carries (spec §4.1
/// "projector must... set `uid`, `name`, `namespace`..., `resourceVersion`,
/// `labels`, `annotations`, `raw`"). Kind-specific projectors call this and
/// then fill in `fields`. Never panics: every lookup degrades to a default.
fn base_projection(obj: &DynamicObject) -> StoredResource {
    let types = obj.types.clone().unwrap_or_default();
    let created_at = obj
        .metadata
        .creation_timestamp
        .as_ref()
        .map(|t| bson::DateTime::from_chrono(t.0))
        .unwrap_or_else(bson::DateTime::now);
    let raw_value = serde_json::to_value(obj).unwrap_or(Value::Null);
    StoredResource {
        uid: obj.metadata.uid.clone(),
        name: obj.metadata.name.clone(),
        namespace: obj.metadata.namespace.clone(),
        kind: types.kind,
        api_version: types.api_version,
        resource_version: obj.metadata.resource_version.clone(),
        labels: obj
            .labels()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
        annotations: obj
            .annotations()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
        created_at,
        updated_at: bson::DateTime::now(),
        fields: Document::new(),
        raw: to_raw_document(&raw_value),
    }
}

fn str_at<'a>(value: &'a Value, path: &[&str]) -> Option<&'a str> {
    let mut cur = value;
    for segment in path {
        cur = cur.get(segment)?;
    }
    cur.as_str()
}

fn array_len_at(value: &Value, path: &[&str]) -> i64 {
    let mut cur = value;
    for segment in path {
        match cur.get(segment) {
            Some(v) => cur = v,
            None => return 0,
        }
    }
    cur.as_array().map(|a| a.len() as i64).unwrap_or(0)
}

pub fn project_generic(obj: &DynamicObject) -> StoredResource {
    base_projection(obj)
}

pub fn project_namespace(obj: &DynamicObject) -> StoredResource {
    let mut record = base_projection(obj);
    let phase = str_at(&obj.data, &["status", "phase"]).unwrap_or("Unknown");
    record.fields = doc! { "phase": phase };
    record
}

pub fn project_node(obj: &DynamicObject) -> StoredResource {
    let mut record = base_projection(obj);
    let ready = obj
        .data
        .get("status")
        .and_then(|s| s.get("conditions"))
        .and_then(|c| c.as_array())
        .and_then(|conditions| {
            conditions
                .iter()
                .find(|c| c.get("type").and_then(Value::as_str) == Some("Ready"))
        })
        .and_then(|c| c.get("status"))
        .and_then(Value::as_str)
        == Some("True");
    let kubelet_version = str_at(&obj.data, &["status", "nodeInfo", "kubeletVersion"])
        .unwrap_or_default();
    let unschedulable = obj
        .data
        .get("spec")
        .and_then(|s| s.get("unschedulable"))
        .and_then(Value::as_bool)
        .unwrap_or(false);
    record.fields = doc! {
        "ready": ready,
        "unschedulable": unschedulable,
        "kubeletVersion": kubelet_version,
    };
    record
}

pub fn project_pod(obj: &DynamicObject) -> StoredResource {
    let mut record = base_projection(obj);
    let phase = str_at(&obj.data, &["status", "phase"]).unwrap_or("Unknown");
    let node_name = str_at(&obj.data, &["spec", "nodeName"]).unwrap_or_default();
    let pod_ip = str_at(&obj.data, &["status", "podIP"]).unwrap_or_default();
    let restart_count: i64 = obj
        .data
        .get("status")
        .and_then(|s| s.get("containerStatuses"))
        .and_then(Value::as_array)
        .map(|statuses| {
            statuses
                .iter()
                .filter_map(|s| s.get("restartCount").and_then(Value::as_i64))
                .sum()
        })
        .unwrap_or(0);
    record.fields = doc! {
        "phase": phase,
        "nodeName": node_name,
        "podIP": pod_ip,
        "restartCount": restart_count,
        "containerCount": array_len_at(&obj.data, &["spec", "containers"]),
    };
    record
}

pub fn project_deployment(obj: &DynamicObject) -> StoredResource {
    let mut record = base_projection(obj);
    let replicas = obj.data.get("spec").and_then(|s| s.get("replicas")).and_then(Value::as_i64).unwrap_or(0);
    let ready_replicas = obj.data.get("status").and_then(|s| s.get("readyReplicas")).and_then(Value::as_i64).unwrap_or(0);
    let available_replicas = obj.data.get("status").and_then(|s| s.get("availableReplicas")).and_then(Value::as_i64).unwrap_or(0);
    record.fields = doc! {
        "replicas": replicas,
        "readyReplicas": ready_replicas,
        "availableReplicas": available_replicas,
    };
    record
}

pub fn project_stateful_set(obj: &DynamicObject) -> StoredResource {
    let mut record = base_projection(obj);
    let replicas = obj.data.get("spec").and_then(|s| s.get("replicas")).and_then(Value::as_i64).unwrap_or(0);
    let ready_replicas = obj.data.get("status").and_then(|s| s.get("readyReplicas")).and_then(Value::as_i64).unwrap_or(0);
    record.fields = doc! { "replicas": replicas, "readyReplicas": ready_replicas };
    record
}

pub fn project_daemon_set(obj: &DynamicObject) -> StoredResource {
    let mut record = base_projection(obj);
    let desired = obj.data.get("status").and_then(|s| s.get("desiredNumberScheduled")).and_then(Value::as_i64).unwrap_or(0);
    let ready = obj.data.get("status").and_then(|s| s.get("numberReady")).and_then(Value::as_i64).unwrap_or(0);
    record.fields = doc! { "desiredNumberScheduled": desired, "numberReady": ready };
    record
}

pub fn project_service(obj: &DynamicObject) -> StoredResource {
    let mut record = base_projection(obj);
    let service_type = str_at(&obj.data, &["spec", "type"]).unwrap_or("ClusterIP");
    let cluster_ip = str_at(&obj.data, &["spec", "clusterIP"]).unwrap_or_default();
    record.fields = doc! {
        "type": service_type,
        "clusterIP": cluster_ip,
        "portCount": array_len_at(&obj.data, &["spec", "ports"]),
    };
    record
}

pub fn project_config_map(obj: &DynamicObject) -> StoredResource {
    let mut record = base_projection(obj);
    let key_count = obj
        .data
        .get("data")
        .and_then(Value::as_object)
        .map(|m| m.len() as i64)
        .unwrap_or(0);
    record.fields = doc! { "keyCount": key_count };
    record
}

pub fn project_secret(obj: &DynamicObject) -> StoredResource {
    let mut record = base_projection(obj);
    let secret_type = str_at(&obj.data, &["type"]).unwrap_or("Opaque");
    let key_count = obj
        .data
        .get("data")
        .and_then(Value::as_object)
        .map(|m| m.len() as i64)
        .unwrap_or(0);
    record.fields = doc! { "type": secret_type, "keyCount": key_count };
    record
}

pub fn project_event(obj: &DynamicObject) -> StoredResource {
    let mut record = base_projection(obj);
    let reason = str_at(&obj.data, &["reason"]).unwrap_or_default();
    let message = str_at(&obj.data, &["message"]).unwrap_or_default();
    let event_type = str_at(&obj.data, &["type"]).unwrap_or_default();
    let involved_kind = str_at(&obj.data, &["involvedObject", "kind"]).unwrap_or_default();
    let involved_name = str_at(&obj.data, &["involvedObject", "name"]).unwrap_or_default();
    let count = obj.data.get("count").and_then(Value::as_i64).unwrap_or(1);
    record.fields = doc! {
        "reason": reason,
        "message": message,
        "type": event_type,
        "involvedKind": involved_kind,
        "involvedName": involved_name,
        "count": count,
    };
    record
}

pub fn project_crd(obj: &DynamicObject) -> StoredResource {
    let mut record = base_projection(obj);
    let group = str_at(&obj.data, &["spec", "group"]).unwrap_or_default();
    let scope = str_at(&obj.data, &["spec", "scope"]).unwrap_or_default();
    record.fields = doc! { "group": group, "scope": scope };
    record
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::{ObjectMeta, TypeMeta};
    use serde_json::json;

    fn dynamic_object(data: Value) -> DynamicObject {
        DynamicObject {
            types: Some(TypeMeta {
                api_version: "v1".into(),
                kind: "Pod".into(),
            }),
            metadata: ObjectMeta {
                uid: Some("u-1".into()),
                name: Some("nginx".into()),
                namespace: Some("default".into()),
                resource_version: Some("42".into()),
                ..Default::default()
            },
            data,
        }
    }

    #[test]
    fn pod_projector_is_deterministic() {
        let obj = dynamic_object(json!({
            "spec": { "nodeName": "node-a", "containers": [{}, {}] },
            "status": {
                "phase": "Running",
                "podIP": "10.0.0.5",
                "containerStatuses": [{ "restartCount": 2 }, { "restartCount": 1 }],
            },
        }));
        let a = project_pod(&obj);
        let b = project_pod(&obj);
        assert_eq!(a.fields, b.fields);
        assert_eq!(a.fields.get_str("phase").unwrap(), "Running");
        assert_eq!(a.fields.get_str("nodeName").unwrap(), "node-a");
        assert_eq!(a.fields.get_i64("restartCount").unwrap(), 3);
        assert_eq!(a.fields.get_i64("containerCount").unwrap(), 2);
    }

    #[test]
    fn pod_projector_degrades_on_missing_fields() {
        let obj = dynamic_object(json!({}));
        let record = project_pod(&obj);
        assert_eq!(record.fields.get_str("phase").unwrap(), "Unknown");
        assert_eq!(record.fields.get_str("nodeName").unwrap(), "");
        assert!(record.is_valid());
    }

    #[test]
    fn base_projection_never_panics_on_missing_metadata() {
        let obj = DynamicObject {
            types: None,
            metadata: ObjectMeta::default(),
            data: Value::Null,
        };
        let record = project_generic(&obj);
        assert!(record.uid.is_none());
        assert!(!record.is_valid());
    }
}
