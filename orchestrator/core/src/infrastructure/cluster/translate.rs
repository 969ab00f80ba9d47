// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Desired-state specs rendered as cluster API objects.
//!
//! Pure functions: nothing here talks to the network, which keeps the object
//! shapes unit-testable without a cluster.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::{json, Map, Value};

use crate::domain::manifest::{Container, ResourceQuantities};
use crate::domain::provider::{IngressSpec, NetworkServiceSpec, VolumeClaimSpec, WorkloadSpec};

pub const DOCKER_CONFIG_SECRET_TYPE: &str = "kubernetes.io/dockerconfigjson";
pub const TLS_SECRET_TYPE: &str = "kubernetes.io/tls";

fn metadata(name: &str, namespace: Option<&str>) -> Value {
    let mut meta = Map::new();
    meta.insert("name".into(), json!(name));
    if let Some(ns) = namespace {
        meta.insert("namespace".into(), json!(ns));
    }
    Value::Object(meta)
}

fn port_number(port: &str) -> i64 {
    port.parse().unwrap_or_default()
}

pub fn namespace(name: &str) -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "Namespace",
        "metadata": metadata(name, None),
    })
}

pub fn service_account(namespace: &str, name: &str) -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "ServiceAccount",
        "metadata": metadata(name, Some(namespace)),
    })
}

/// Role granting what dev mode needs: read pods and logs, exec, port-forward.
pub fn role(namespace: &str, name: &str) -> Value {
    json!({
        "apiVersion": "rbac.authorization.k8s.io/v1",
        "kind": "Role",
        "metadata": metadata(name, Some(namespace)),
        "rules": [
            { "apiGroups": [""], "resources": ["pods", "pods/log"], "verbs": ["get", "list"] },
            { "apiGroups": [""], "resources": ["pods/exec"], "verbs": ["create"] },
            { "apiGroups": [""], "resources": ["pods/portforward"], "verbs": ["create"] },
        ],
    })
}

pub fn role_binding(namespace: &str, name: &str) -> Value {
    json!({
        "apiVersion": "rbac.authorization.k8s.io/v1",
        "kind": "RoleBinding",
        "metadata": metadata(name, Some(namespace)),
        "subjects": [
            { "kind": "ServiceAccount", "name": name, "namespace": namespace },
        ],
        "roleRef": {
            "apiGroup": "rbac.authorization.k8s.io",
            "kind": "Role",
            "name": name,
        },
    })
}

pub fn registry_secret(namespace: &str, name: &str, docker_config_json: &str) -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "Secret",
        "type": DOCKER_CONFIG_SECRET_TYPE,
        "metadata": metadata(name, Some(namespace)),
        "data": {
            ".dockerconfigjson": BASE64.encode(docker_config_json),
        },
    })
}

/// Re-homes the data of an existing TLS secret into `namespace`.
pub fn tls_secret_copy(source: &Value, namespace: &str, name: &str) -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "Secret",
        "type": TLS_SECRET_TYPE,
        "metadata": metadata(name, Some(namespace)),
        "data": source.get("data").cloned().unwrap_or_else(|| json!({})),
    })
}

pub fn volume_claim(namespace: &str, claim: &VolumeClaimSpec) -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "PersistentVolumeClaim",
        "metadata": metadata(&claim.name, Some(namespace)),
        "spec": {
            "accessModes": ["ReadWriteOnce"],
            "resources": {
                "requests": { "storage": claim.size },
            },
        },
    })
}

fn quantities(q: &ResourceQuantities) -> Value {
    let mut out = Map::new();
    if !q.memory.is_empty() {
        out.insert("memory".into(), json!(q.memory));
    }
    if !q.cpu.is_empty() {
        out.insert("cpu".into(), json!(q.cpu));
    }
    Value::Object(out)
}

fn container(name: &str, c: &Container) -> Value {
    let ports: Vec<Value> = c
        .ports
        .iter()
        .map(|p| json!({ "name": format!("p{}", p), "containerPort": port_number(p), "protocol": "TCP" }))
        .collect();
    let env: Vec<Value> = c
        .environment
        .iter()
        .map(|e| json!({ "name": e.name, "value": e.value }))
        .collect();
    let mounts: Vec<Value> = c
        .mounts
        .iter()
        .map(|(volume, mount)| json!({ "name": volume, "mountPath": mount.path }))
        .collect();

    let mut out = json!({
        "name": name,
        "image": c.image,
        "ports": ports,
        "env": env,
        "volumeMounts": mounts,
    });
    if !c.working_dir.is_empty() {
        out["workingDir"] = json!(c.working_dir);
    }
    if !c.command.is_empty() {
        out["command"] = json!([c.command]);
    }
    if !c.args.is_empty() {
        out["args"] = json!(c.args);
    }
    if let Some(resources) = &c.resources {
        let mut r = Map::new();
        if let Some(limits) = &resources.limits {
            r.insert("limits".into(), quantities(limits));
        }
        if let Some(requests) = &resources.requests {
            r.insert("requests".into(), quantities(requests));
        }
        out["resources"] = Value::Object(r);
    }
    out
}

/// Deployment for a workload. `revision` is stamped into the pod labels so
/// every apply rolls the pods.
pub fn deployment(namespace: &str, workload: &WorkloadSpec, revision: &str) -> Value {
    let manifest = &workload.manifest;
    let name = workload.name();

    let mut pod_labels = Map::new();
    pod_labels.insert("app".into(), json!(name));
    pod_labels.insert("okteto-uuid".into(), json!(revision));
    for (k, v) in &manifest.labels {
        pod_labels.insert(k.clone(), json!(v));
    }

    let volumes: Vec<Value> = manifest
        .volumes
        .values()
        .map(|v| match workload.claims.get(&v.name) {
            Some(claim) if v.persistent => json!({
                "name": v.name,
                "persistentVolumeClaim": { "claimName": claim, "readOnly": false },
            }),
            _ => json!({ "name": v.name, "emptyDir": {} }),
        })
        .collect();
    let containers: Vec<Value> = manifest
        .containers
        .iter()
        .map(|(name, c)| container(name, c))
        .collect();

    let mut pod_spec = json!({
        "terminationGracePeriodSeconds": manifest.grace_period,
        "containers": containers,
        "volumes": volumes,
    });
    if let Some(secret) = &workload.pull_secret {
        pod_spec["imagePullSecrets"] = json!([{ "name": secret }]);
    }

    let mut spec = json!({
        "replicas": manifest.replicas,
        "revisionHistoryLimit": 0,
        "selector": { "matchLabels": { "app": name } },
        "template": {
            "metadata": { "labels": Value::Object(pod_labels) },
            "spec": pod_spec,
        },
    });
    if manifest.is_persistent() {
        spec["strategy"] = json!({ "type": "Recreate" });
    }

    json!({
        "apiVersion": "apps/v1",
        "kind": "Deployment",
        "metadata": metadata(name, Some(namespace)),
        "spec": spec,
    })
}

pub fn service_ports(ports: &[String]) -> Value {
    Value::Array(
        ports
            .iter()
            .map(|p| {
                let port = port_number(p);
                json!({ "name": format!("p{}", p), "port": port, "targetPort": port })
            })
            .collect(),
    )
}

pub fn network_service(namespace: &str, service: &NetworkServiceSpec) -> Value {
    let kind = if service.load_balancer { "LoadBalancer" } else { "ClusterIP" };
    json!({
        "apiVersion": "v1",
        "kind": "Service",
        "metadata": metadata(&service.name, Some(namespace)),
        "spec": {
            "type": kind,
            "selector": { "app": service.app },
            "ports": service_ports(&service.ports),
        },
    })
}

pub fn ingress(namespace: &str, spec: &IngressSpec) -> Value {
    let mut hosts: Vec<&str> = Vec::new();
    for path in &spec.paths {
        if !hosts.contains(&path.host.as_str()) {
            hosts.push(&path.host);
        }
    }
    let rules: Vec<Value> = hosts
        .iter()
        .map(|host| {
            let paths: Vec<Value> = spec
                .paths
                .iter()
                .filter(|p| p.host == *host)
                .map(|p| {
                    json!({
                        "path": p.path,
                        "pathType": "Prefix",
                        "backend": {
                            "service": {
                                "name": spec.service,
                                "port": { "number": port_number(&p.port) },
                            },
                        },
                    })
                })
                .collect();
            json!({ "host": host, "http": { "paths": paths } })
        })
        .collect();

    let mut body = json!({
        "apiVersion": "networking.k8s.io/v1",
        "kind": "Ingress",
        "metadata": metadata(&spec.name, Some(namespace)),
        "spec": { "rules": rules },
    });
    body["metadata"]["annotations"] = json!(spec.annotations);
    if let Some(tls) = &spec.tls {
        body["spec"]["tls"] = json!([{ "secretName": tls.secret, "hosts": tls.hosts }]);
    }
    body
}

/// First external address published for a load-balanced service.
pub fn load_balancer_address(service: &Value) -> Option<String> {
    let ingress = service.pointer("/status/loadBalancer/ingress")?.as_array()?;
    let first = ingress.first()?;
    first
        .get("ip")
        .or_else(|| first.get("hostname"))
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::manifest::Manifest;
    use crate::domain::provider::{IngressPath, IngressTls};
    use std::collections::BTreeMap;

    fn workload(yaml: &str) -> WorkloadSpec {
        let manifest = Manifest::parse(yaml).unwrap();
        let claims = manifest
            .persistent_volumes()
            .map(|v| (v.name.clone(), format!("{}.{}.ns", v.name, manifest.name)))
            .collect();
        WorkloadSpec {
            manifest,
            claims,
            pull_secret: Some("ns".to_string()),
        }
    }

    #[test]
    fn test_deployment_shape() {
        let spec = workload(
            r#"
name: api
replicas: 1
containers:
  api:
    image: acme/api:1
    command: /bin/api
    ports: ["8080"]
    environment:
      - MODE=prod
    mounts:
      data:
        path: /data
    resources:
      limits:
        memory: 256Mi
volumes:
  data:
    persistent: true
labels:
  team: core
"#,
        );
        let d = deployment("ns", &spec, "rev-1");

        assert_eq!(d["kind"], "Deployment");
        assert_eq!(d["spec"]["revisionHistoryLimit"], 0);
        assert_eq!(d["spec"]["strategy"]["type"], "Recreate");
        assert_eq!(d["spec"]["selector"]["matchLabels"]["app"], "api");
        let labels = &d["spec"]["template"]["metadata"]["labels"];
        assert_eq!(labels["okteto-uuid"], "rev-1");
        assert_eq!(labels["team"], "core");
        let pod = &d["spec"]["template"]["spec"];
        assert_eq!(pod["terminationGracePeriodSeconds"], 30);
        assert_eq!(pod["imagePullSecrets"][0]["name"], "ns");
        assert_eq!(pod["volumes"][0]["persistentVolumeClaim"]["claimName"], "data.api.ns");
        let c = &pod["containers"][0];
        assert_eq!(c["ports"][0]["name"], "p8080");
        assert_eq!(c["ports"][0]["containerPort"], 8080);
        assert_eq!(c["command"][0], "/bin/api");
        assert_eq!(c["env"][0]["value"], "prod");
        assert_eq!(c["resources"]["limits"]["memory"], "256Mi");
    }

    #[test]
    fn test_stateless_deployment_has_no_recreate_strategy() {
        let spec = WorkloadSpec {
            pull_secret: None,
            ..workload("name: web\ncontainers:\n  web:\n    image: nginx\n")
        };
        let d = deployment("ns", &spec, "rev");
        assert!(d["spec"].get("strategy").is_none());
        assert!(d["spec"]["template"]["spec"].get("imagePullSecrets").is_none());
    }

    #[test]
    fn test_ingress_groups_paths_by_host() {
        let spec = IngressSpec {
            name: "web".into(),
            service: "web".into(),
            annotations: BTreeMap::from([("kubernetes.io/ingress.class".to_string(), "nginx".to_string())]),
            paths: vec![
                IngressPath { host: "a.example.com".into(), path: "/".into(), port: "80".into() },
                IngressPath { host: "a.example.com".into(), path: "/api".into(), port: "8080".into() },
                IngressPath { host: "b.example.com".into(), path: "/".into(), port: "80".into() },
            ],
            tls: Some(IngressTls { secret: "web-letsencrypt".into(), hosts: vec!["a.example.com".into()] }),
        };
        let ing = ingress("ns", &spec);
        assert_eq!(ing["apiVersion"], "networking.k8s.io/v1");
        assert_eq!(ing["spec"]["rules"].as_array().unwrap().len(), 2);
        assert_eq!(ing["spec"]["rules"][0]["http"]["paths"][1]["backend"]["service"]["port"]["number"], 8080);
        assert_eq!(ing["spec"]["tls"][0]["secretName"], "web-letsencrypt");
        assert_eq!(ing["metadata"]["annotations"]["kubernetes.io/ingress.class"], "nginx");
    }

    #[test]
    fn test_load_balancer_address() {
        let pending = json!({ "status": { "loadBalancer": {} } });
        assert_eq!(load_balancer_address(&pending), None);
        let ip = json!({ "status": { "loadBalancer": { "ingress": [{ "ip": "1.2.3.4" }] } } });
        assert_eq!(load_balancer_address(&ip).as_deref(), Some("1.2.3.4"));
        let host = json!({ "status": { "loadBalancer": { "ingress": [{ "hostname": "lb.aws.com" }] } } });
        assert_eq!(load_balancer_address(&host).as_deref(), Some("lb.aws.com"));
    }

    #[test]
    fn test_registry_secret_is_encoded() {
        let s = registry_secret("ns", "ns", "{\"auths\":{}}");
        assert_eq!(s["type"], DOCKER_CONFIG_SECRET_TYPE);
        assert_eq!(s["data"][".dockerconfigjson"], BASE64.encode("{\"auths\":{}}"));
    }
}
