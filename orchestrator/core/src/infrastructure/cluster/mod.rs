// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Cluster Resource Provider
//!
//! Implements [`ResourceProvider`] against the REST API of a Kubernetes
//! cluster as an Anti-Corruption Layer. Object shapes live in [`translate`];
//! this module only maps them onto HTTP verbs.
//!
//! # API Endpoints
//!
//! - `GET|POST /api/v1/namespaces`
//! - `GET|POST|PUT|DELETE /api/v1/namespaces/{ns}/{secrets,serviceaccounts,persistentvolumeclaims,services}`
//! - `GET|POST|PUT|DELETE /apis/rbac.authorization.k8s.io/v1/namespaces/{ns}/{roles,rolebindings}`
//! - `GET|POST|PUT|DELETE /apis/apps/v1/namespaces/{ns}/deployments`
//! - `GET|POST|PUT|DELETE /apis/networking.k8s.io/v1/namespaces/{ns}/ingresses`
//!
//! Authentication is HTTP basic auth; the provider CA certificate is added to
//! the trusted roots.

pub mod translate;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use reqwest::{Certificate, Client, RequestBuilder, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

use crate::domain::environment::ProviderSettings;
use crate::domain::provider::{
    ApplyOutcome, DeleteOutcome, IngressSpec, LoadBalancerState, NetworkServiceSpec, ProviderError,
    ResourceKind, ResourceProvider, VolumeClaimSpec, WorkloadSpec, WorkloadStatus,
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Cluster REST adapter
pub struct ClusterProvider {
    client: Client,
    endpoint: String,
    username: String,
    password: String,
}

impl ClusterProvider {
    pub fn new(settings: &ProviderSettings) -> Result<Self, ProviderError> {
        if settings.endpoint.is_empty() {
            return Err(ProviderError::InvalidConfig("'provider.endpoint' cannot be empty".to_string()));
        }
        let mut builder = Client::builder().timeout(REQUEST_TIMEOUT);
        if !settings.ca_cert.is_empty() {
            let cert = Certificate::from_pem(settings.ca_cert.as_bytes())
                .map_err(|e| ProviderError::InvalidConfig(format!("invalid CA certificate: {}", e)))?;
            builder = builder.add_root_certificate(cert);
        }
        let client = builder
            .build()
            .map_err(|e| ProviderError::InvalidConfig(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: settings.endpoint.trim_end_matches('/').to_string(),
            username: settings.username.clone(),
            password: settings.password.clone(),
        })
    }

    fn collection_path(namespace: &str, kind: ResourceKind) -> String {
        match kind {
            ResourceKind::Namespace => "/api/v1/namespaces".to_string(),
            ResourceKind::ServiceAccount => format!("/api/v1/namespaces/{}/serviceaccounts", namespace),
            ResourceKind::Secret => format!("/api/v1/namespaces/{}/secrets", namespace),
            ResourceKind::VolumeClaim => format!("/api/v1/namespaces/{}/persistentvolumeclaims", namespace),
            ResourceKind::NetworkService => format!("/api/v1/namespaces/{}/services", namespace),
            ResourceKind::Role => format!("/apis/rbac.authorization.k8s.io/v1/namespaces/{}/roles", namespace),
            ResourceKind::RoleBinding => {
                format!("/apis/rbac.authorization.k8s.io/v1/namespaces/{}/rolebindings", namespace)
            }
            ResourceKind::Workload => format!("/apis/apps/v1/namespaces/{}/deployments", namespace),
            ResourceKind::Ingress => format!("/apis/networking.k8s.io/v1/namespaces/{}/ingresses", namespace),
        }
    }

    fn collection_url(&self, namespace: &str, kind: ResourceKind) -> String {
        format!("{}{}", self.endpoint, Self::collection_path(namespace, kind))
    }

    fn object_url(&self, namespace: &str, kind: ResourceKind, name: &str) -> String {
        format!("{}/{}", self.collection_url(namespace, kind), name)
    }

    fn authed(&self, request: RequestBuilder) -> RequestBuilder {
        request.basic_auth(&self.username, Some(&self.password))
    }

    async fn api_error(kind: ResourceKind, name: &str, response: reqwest::Response) -> ProviderError {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        // Prefer the Status object's message when the API sent one
        let message = serde_json::from_str::<Value>(&body)
            .ok()
            .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_string))
            .unwrap_or(body);
        ProviderError::Api {
            kind,
            name: name.to_string(),
            status,
            message,
        }
    }

    async fn get(&self, namespace: &str, kind: ResourceKind, name: &str) -> Result<Option<Value>, ProviderError> {
        let response = self
            .authed(self.client.get(self.object_url(namespace, kind, name)))
            .send()
            .await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            s if s.is_success() => Ok(Some(response.json().await?)),
            _ => Err(Self::api_error(kind, name, response).await),
        }
    }

    async fn create(&self, namespace: &str, kind: ResourceKind, name: &str, body: &Value) -> Result<(), ProviderError> {
        debug!(%kind, name, namespace, "creating cluster object");
        let response = self
            .authed(self.client.post(self.collection_url(namespace, kind)))
            .json(body)
            .send()
            .await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(Self::api_error(kind, name, response).await)
        }
    }

    async fn replace(
        &self,
        namespace: &str,
        kind: ResourceKind,
        name: &str,
        existing: &Value,
        mut body: Value,
    ) -> Result<(), ProviderError> {
        debug!(%kind, name, namespace, "replacing cluster object");
        if let Some(version) = existing.pointer("/metadata/resourceVersion") {
            body["metadata"]["resourceVersion"] = version.clone();
        }
        let response = self
            .authed(self.client.put(self.object_url(namespace, kind, name)))
            .json(&body)
            .send()
            .await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(Self::api_error(kind, name, response).await)
        }
    }

    async fn create_if_absent(
        &self,
        namespace: &str,
        kind: ResourceKind,
        name: &str,
        body: &Value,
    ) -> Result<ApplyOutcome, ProviderError> {
        if self.get(namespace, kind, name).await?.is_some() {
            return Ok(ApplyOutcome::Existing);
        }
        self.create(namespace, kind, name, body).await?;
        Ok(ApplyOutcome::Created)
    }

    async fn create_or_replace(
        &self,
        namespace: &str,
        kind: ResourceKind,
        name: &str,
        body: Value,
    ) -> Result<ApplyOutcome, ProviderError> {
        match self.get(namespace, kind, name).await? {
            Some(existing) => {
                self.replace(namespace, kind, name, &existing, body).await?;
                Ok(ApplyOutcome::Updated)
            }
            None => {
                self.create(namespace, kind, name, &body).await?;
                Ok(ApplyOutcome::Created)
            }
        }
    }
}

#[async_trait]
impl ResourceProvider for ClusterProvider {
    fn name(&self) -> &'static str {
        "cluster"
    }

    async fn exists(&self, namespace: &str, kind: ResourceKind, name: &str) -> Result<bool, ProviderError> {
        Ok(self.get(namespace, kind, name).await?.is_some())
    }

    async fn delete(&self, namespace: &str, kind: ResourceKind, name: &str) -> Result<DeleteOutcome, ProviderError> {
        let mut request = self.authed(self.client.delete(self.object_url(namespace, kind, name)));
        if kind == ResourceKind::Workload {
            request = request.json(&json!({
                "kind": "DeleteOptions",
                "apiVersion": "v1",
                "propagationPolicy": "Foreground",
            }));
        }
        let response = request.send().await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(DeleteOutcome::Absent),
            s if s.is_success() => Ok(DeleteOutcome::Deleted),
            _ => Err(Self::api_error(kind, name, response).await),
        }
    }

    async fn ensure_namespace(&self, namespace: &str) -> Result<ApplyOutcome, ProviderError> {
        self.create_if_absent("", ResourceKind::Namespace, namespace, &translate::namespace(namespace))
            .await
    }

    async fn ensure_dev_access(&self, namespace: &str, name: &str) -> Result<ApplyOutcome, ProviderError> {
        let account = self
            .create_if_absent(namespace, ResourceKind::ServiceAccount, name, &translate::service_account(namespace, name))
            .await?;
        let role = self
            .create_if_absent(namespace, ResourceKind::Role, name, &translate::role(namespace, name))
            .await?;
        let binding = self
            .create_if_absent(namespace, ResourceKind::RoleBinding, name, &translate::role_binding(namespace, name))
            .await?;

        let all_existing = [account, role, binding].iter().all(|o| *o == ApplyOutcome::Existing);
        Ok(if all_existing { ApplyOutcome::Existing } else { ApplyOutcome::Created })
    }

    async fn dev_token(&self, namespace: &str, service_account: &str) -> Result<Option<String>, ProviderError> {
        let Some(account) = self.get(namespace, ResourceKind::ServiceAccount, service_account).await? else {
            return Ok(None);
        };
        let Some(secret_name) = account
            .pointer("/secrets/0/name")
            .and_then(Value::as_str)
            .map(str::to_string)
        else {
            return Ok(None);
        };
        let Some(secret) = self.get(namespace, ResourceKind::Secret, &secret_name).await? else {
            return Ok(None);
        };
        let Some(encoded) = secret.pointer("/data/token").and_then(Value::as_str) else {
            return Ok(None);
        };
        let bytes = BASE64.decode(encoded).map_err(|e| ProviderError::Api {
            kind: ResourceKind::Secret,
            name: secret_name.clone(),
            status: 200,
            message: format!("token is not valid base64: {}", e),
        })?;
        Ok(Some(String::from_utf8_lossy(&bytes).into_owned()))
    }

    async fn apply_registry_secret(
        &self,
        namespace: &str,
        name: &str,
        docker_config_json: &str,
    ) -> Result<ApplyOutcome, ProviderError> {
        let body = translate::registry_secret(namespace, name, docker_config_json);
        self.create_or_replace(namespace, ResourceKind::Secret, name, body).await
    }

    async fn copy_tls_secret(
        &self,
        source_namespace: &str,
        name: &str,
        namespace: &str,
    ) -> Result<ApplyOutcome, ProviderError> {
        let source = self
            .get(source_namespace, ResourceKind::Secret, name)
            .await?
            .ok_or_else(|| {
                ProviderError::Precondition(format!(
                    "TLS secret '{}' not found in namespace '{}'",
                    name, source_namespace
                ))
            })?;
        let body = translate::tls_secret_copy(&source, namespace, name);
        self.create_or_replace(namespace, ResourceKind::Secret, name, body).await
    }

    async fn ensure_volume_claim(&self, namespace: &str, claim: &VolumeClaimSpec) -> Result<ApplyOutcome, ProviderError> {
        self.create_if_absent(namespace, ResourceKind::VolumeClaim, &claim.name, &translate::volume_claim(namespace, claim))
            .await
    }

    async fn volume_claim_bound(&self, namespace: &str, name: &str) -> Result<bool, ProviderError> {
        let claim = self.get(namespace, ResourceKind::VolumeClaim, name).await?;
        Ok(claim
            .as_ref()
            .and_then(|c| c.pointer("/status/phase"))
            .and_then(Value::as_str)
            == Some("Bound"))
    }

    async fn apply_workload(&self, namespace: &str, workload: &WorkloadSpec) -> Result<ApplyOutcome, ProviderError> {
        let revision = Uuid::new_v4().to_string();
        let body = translate::deployment(namespace, workload, &revision);
        self.create_or_replace(namespace, ResourceKind::Workload, workload.name(), body).await
    }

    async fn workload_status(&self, namespace: &str, name: &str) -> Result<Option<WorkloadStatus>, ProviderError> {
        let Some(deployment) = self.get(namespace, ResourceKind::Workload, name).await? else {
            return Ok(None);
        };
        let int = |path: &str| deployment.pointer(path).and_then(Value::as_i64);
        let field = |path: &str| int(path).unwrap_or(0) as i32;
        let observed = match (int("/metadata/generation"), int("/status/observedGeneration")) {
            (Some(generation), Some(observed)) => observed >= generation,
            _ => false,
        };
        Ok(Some(WorkloadStatus {
            replicas: field("/status/replicas"),
            ready: field("/status/readyReplicas"),
            updated: field("/status/updatedReplicas"),
            unavailable: field("/status/unavailableReplicas"),
            observed,
        }))
    }

    async fn apply_network_service(
        &self,
        namespace: &str,
        service: &NetworkServiceSpec,
    ) -> Result<ApplyOutcome, ProviderError> {
        let kind = ResourceKind::NetworkService;
        match self.get(namespace, kind, &service.name).await? {
            Some(mut existing) => {
                // Only ports change; cluster IP and allocated node ports stay.
                existing["spec"]["ports"] = translate::service_ports(&service.ports);
                let body = existing.clone();
                self.replace(namespace, kind, &service.name, &existing, body).await?;
                Ok(ApplyOutcome::Updated)
            }
            None => {
                self.create(namespace, kind, &service.name, &translate::network_service(namespace, service))
                    .await?;
                Ok(ApplyOutcome::Created)
            }
        }
    }

    async fn load_balancer_state(&self, namespace: &str, name: &str) -> Result<LoadBalancerState, ProviderError> {
        Ok(match self.get(namespace, ResourceKind::NetworkService, name).await? {
            None => LoadBalancerState::Missing,
            Some(service) => match translate::load_balancer_address(&service) {
                Some(address) => LoadBalancerState::Ready(address),
                None => LoadBalancerState::Pending,
            },
        })
    }

    async fn apply_ingress(&self, namespace: &str, ingress: &IngressSpec) -> Result<ApplyOutcome, ProviderError> {
        let body = translate::ingress(namespace, ingress);
        self.create_or_replace(namespace, ResourceKind::Ingress, &ingress.name, body).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn provider(url: &str) -> ClusterProvider {
        ClusterProvider::new(&ProviderSettings {
            endpoint: url.to_string(),
            username: "admin".into(),
            password: "secret".into(),
            ..ProviderSettings::demo()
        })
        .unwrap()
    }

    #[test]
    fn test_requires_endpoint() {
        assert!(matches!(
            ClusterProvider::new(&ProviderSettings::demo()),
            Err(ProviderError::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn test_ensure_namespace_creates_when_absent() {
        let mut server = mockito::Server::new_async().await;
        let get = server
            .mock("GET", "/api/v1/namespaces/shop")
            .match_header("authorization", Matcher::Regex("^Basic ".into()))
            .with_status(404)
            .create_async()
            .await;
        let post = server
            .mock("POST", "/api/v1/namespaces")
            .match_body(Matcher::PartialJson(json!({ "metadata": { "name": "shop" } })))
            .with_status(201)
            .with_body("{}")
            .create_async()
            .await;

        let outcome = provider(&server.url()).ensure_namespace("shop").await.unwrap();
        assert_eq!(outcome, ApplyOutcome::Created);
        get.assert_async().await;
        post.assert_async().await;
    }

    #[tokio::test]
    async fn test_ensure_namespace_keeps_existing() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v1/namespaces/shop")
            .with_status(200)
            .with_body(r#"{"metadata":{"name":"shop"}}"#)
            .create_async()
            .await;
        let post = server.mock("POST", "/api/v1/namespaces").expect(0).create_async().await;

        let outcome = provider(&server.url()).ensure_namespace("shop").await.unwrap();
        assert_eq!(outcome, ApplyOutcome::Existing);
        post.assert_async().await;
    }

    #[tokio::test]
    async fn test_apply_workload_replaces_with_resource_version() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/apis/apps/v1/namespaces/ns/deployments/web")
            .with_status(200)
            .with_body(r#"{"metadata":{"name":"web","resourceVersion":"42"}}"#)
            .create_async()
            .await;
        let put = server
            .mock("PUT", "/apis/apps/v1/namespaces/ns/deployments/web")
            .match_body(Matcher::PartialJson(json!({ "metadata": { "resourceVersion": "42" } })))
            .with_status(200)
            .with_body("{}")
            .create_async()
            .await;

        let manifest = crate::domain::manifest::Manifest::parse("name: web\ncontainers:\n  web:\n    image: nginx\n").unwrap();
        let workload = WorkloadSpec { manifest, claims: Default::default(), pull_secret: None };
        let outcome = provider(&server.url()).apply_workload("ns", &workload).await.unwrap();
        assert_eq!(outcome, ApplyOutcome::Updated);
        put.assert_async().await;
    }

    #[tokio::test]
    async fn test_workload_status_waits_for_new_generation() {
        let mut server = mockito::Server::new_async().await;
        // replaced spec not yet picked up: counts still show the old rollout
        server
            .mock("GET", "/apis/apps/v1/namespaces/ns/deployments/web")
            .with_status(200)
            .with_body(
                r#"{"metadata":{"name":"web","generation":3},
                    "status":{"observedGeneration":2,"replicas":2,"readyReplicas":2,"updatedReplicas":2}}"#,
            )
            .create_async()
            .await;

        let status = provider(&server.url()).workload_status("ns", "web").await.unwrap().unwrap();
        assert!(!status.observed);
        assert!(!status.is_ready(2));

        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/apis/apps/v1/namespaces/ns/deployments/web")
            .with_status(200)
            .with_body(
                r#"{"metadata":{"name":"web","generation":3},
                    "status":{"observedGeneration":3,"replicas":2,"readyReplicas":2,"updatedReplicas":2}}"#,
            )
            .create_async()
            .await;
        let status = provider(&server.url()).workload_status("ns", "web").await.unwrap().unwrap();
        assert!(status.is_ready(2));
    }

    #[tokio::test]
    async fn test_workload_status_without_observed_generation_is_not_ready() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/apis/apps/v1/namespaces/ns/deployments/web")
            .with_status(200)
            .with_body(r#"{"metadata":{"name":"web","generation":1},"status":{"replicas":1,"readyReplicas":1,"updatedReplicas":1}}"#)
            .create_async()
            .await;

        let status = provider(&server.url()).workload_status("ns", "web").await.unwrap().unwrap();
        assert!(!status.is_ready(1));
    }

    #[tokio::test]
    async fn test_delete_tolerates_absence() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("DELETE", "/api/v1/namespaces/ns/services/web")
            .with_status(404)
            .create_async()
            .await;

        let outcome = provider(&server.url())
            .delete("ns", ResourceKind::NetworkService, "web")
            .await
            .unwrap();
        assert_eq!(outcome, DeleteOutcome::Absent);
    }

    #[tokio::test]
    async fn test_api_error_carries_status_message() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v1/namespaces/ns/persistentvolumeclaims/data.web.ns")
            .with_status(403)
            .with_body(r#"{"kind":"Status","message":"forbidden: no access"}"#)
            .create_async()
            .await;

        let err = provider(&server.url())
            .volume_claim_bound("ns", "data.web.ns")
            .await
            .unwrap_err();
        match err {
            ProviderError::Api { status, message, kind, .. } => {
                assert_eq!(status, 403);
                assert_eq!(message, "forbidden: no access");
                assert_eq!(kind, ResourceKind::VolumeClaim);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_dev_token_reads_service_account_secret() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v1/namespaces/ns/serviceaccounts/ns-dev")
            .with_status(200)
            .with_body(r#"{"secrets":[{"name":"ns-dev-token-abc"}]}"#)
            .create_async()
            .await;
        server
            .mock("GET", "/api/v1/namespaces/ns/secrets/ns-dev-token-abc")
            .with_status(200)
            .with_body(format!(r#"{{"data":{{"token":"{}"}}}}"#, BASE64.encode("tok")))
            .create_async()
            .await;

        let token = provider(&server.url()).dev_token("ns", "ns-dev").await.unwrap();
        assert_eq!(token.as_deref(), Some("tok"));
    }
}
