// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Route53 DNS Registrar
//!
//! Implements [`DnsRegistrar`] with the Route53 `ChangeResourceRecordSets`
//! REST call, signed with AWS Signature Version 4.
//!
//! # API Endpoints
//!
//! - `POST /2013-04-01/hostedzone/{id}/rrset/` - UPSERT or DELETE one record

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::Client;
use sha2::{Digest, Sha256};
use std::time::Duration;
use tracing::debug;

use crate::domain::environment::DnsSettings;
use crate::domain::provider::{DeleteOutcome, DnsRecord, DnsRegistrar, ProviderError};

type HmacSha256 = Hmac<Sha256>;

const ROUTE53_ENDPOINT: &str = "https://route53.amazonaws.com";
const ROUTE53_SERVICE: &str = "route53";
const API_VERSION: &str = "2013-04-01";

pub struct Route53Registrar {
    client: Client,
    endpoint: String,
    settings: DnsSettings,
}

impl Route53Registrar {
    pub fn new(settings: DnsSettings) -> Result<Self, ProviderError> {
        Self::with_endpoint(settings, ROUTE53_ENDPOINT)
    }

    /// Registrar talking to a non-default endpoint.
    pub fn with_endpoint(settings: DnsSettings, endpoint: &str) -> Result<Self, ProviderError> {
        if !settings.is_configured() {
            return Err(ProviderError::InvalidConfig("dns provider is not fully configured".to_string()));
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ProviderError::InvalidConfig(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            settings,
        })
    }

    fn change_path(&self) -> String {
        let zone_id = self.settings.hosted_zone_id.trim_start_matches("/hostedzone/");
        format!("/{}/hostedzone/{}/rrset/", API_VERSION, zone_id)
    }

    async fn change(&self, action: &str, record: &DnsRecord) -> Result<reqwest::Response, ProviderError> {
        let path = self.change_path();
        let body = change_batch_xml(action, record);
        let now = Utc::now();
        let host = host_of(&self.endpoint);
        let signature = sign_v4(
            &self.settings,
            &SigningRequest {
                method: "POST",
                host: &host,
                path: &path,
                content_type: "application/xml",
                payload: body.as_bytes(),
            },
            now,
        )?;

        debug!(action, record = %record.name, target = %record.target, "changing dns record");
        let response = self
            .client
            .post(format!("{}{}", self.endpoint, path))
            .header("content-type", "application/xml")
            .header("x-amz-date", signature.amz_date)
            .header("authorization", signature.authorization)
            .body(body)
            .send()
            .await?;
        Ok(response)
    }
}

#[async_trait]
impl DnsRegistrar for Route53Registrar {
    async fn upsert(&self, record: &DnsRecord) -> Result<(), ProviderError> {
        let response = self.change("UPSERT", record).await?;
        if response.status().is_success() {
            return Ok(());
        }
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        Err(ProviderError::Dns(format!(
            "UPSERT {} failed ({}): {}",
            record.name, status, text
        )))
    }

    async fn delete(&self, record: &DnsRecord) -> Result<DeleteOutcome, ProviderError> {
        let response = self.change("DELETE", record).await?;
        if response.status().is_success() {
            return Ok(DeleteOutcome::Deleted);
        }
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        // Route53 rejects deleting a record that does not exist
        if status.as_u16() == 400 && text.contains("not found") {
            return Ok(DeleteOutcome::Absent);
        }
        Err(ProviderError::Dns(format!(
            "DELETE {} failed ({}): {}",
            record.name, status, text
        )))
    }

    async fn resolves(&self, name: &str) -> Result<bool, ProviderError> {
        let host = name.trim_end_matches('.');
        match tokio::net::lookup_host((host, 80)).await {
            Ok(mut addrs) => Ok(addrs.next().is_some()),
            Err(e) => {
                debug!(name = host, error = %e, "dns name does not resolve yet");
                Ok(false)
            }
        }
    }
}

fn host_of(endpoint: &str) -> String {
    endpoint
        .split("://")
        .nth(1)
        .unwrap_or(endpoint)
        .trim_end_matches('/')
        .to_string()
}

fn xml_escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn change_batch_xml(action: &str, record: &DnsRecord) -> String {
    format!(
        concat!(
            r#"<?xml version="1.0" encoding="UTF-8"?>"#,
            r#"<ChangeResourceRecordSetsRequest xmlns="https://route53.amazonaws.com/doc/2013-04-01/">"#,
            "<ChangeBatch><Changes><Change>",
            "<Action>{action}</Action>",
            "<ResourceRecordSet>",
            "<Name>{name}</Name><Type>{kind}</Type><TTL>{ttl}</TTL>",
            "<ResourceRecords><ResourceRecord><Value>{target}</Value></ResourceRecord></ResourceRecords>",
            "</ResourceRecordSet>",
            "</Change></Changes></ChangeBatch>",
            "</ChangeResourceRecordSetsRequest>"
        ),
        action = action,
        name = xml_escape(&record.name),
        kind = record.record_type.as_str(),
        ttl = record.ttl,
        target = xml_escape(&record.target),
    )
}

struct SigningRequest<'a> {
    method: &'a str,
    host: &'a str,
    path: &'a str,
    content_type: &'a str,
    payload: &'a [u8],
}

struct Signature {
    amz_date: String,
    authorization: String,
}

fn hmac(key: &[u8], data: &[u8]) -> Result<Vec<u8>, ProviderError> {
    let mut mac = HmacSha256::new_from_slice(key).map_err(|e| ProviderError::Dns(e.to_string()))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

fn sign_v4(settings: &DnsSettings, request: &SigningRequest<'_>, now: DateTime<Utc>) -> Result<Signature, ProviderError> {
    let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
    let date = now.format("%Y%m%d").to_string();
    let scope = format!("{}/{}/{}/aws4_request", date, settings.region, ROUTE53_SERVICE);
    let signed_headers = "content-type;host;x-amz-date";

    let canonical_request = format!(
        "{}\n{}\n\ncontent-type:{}\nhost:{}\nx-amz-date:{}\n\n{}\n{}",
        request.method,
        request.path,
        request.content_type,
        request.host,
        amz_date,
        signed_headers,
        sha256_hex(request.payload),
    );
    let string_to_sign = format!(
        "AWS4-HMAC-SHA256\n{}\n{}\n{}",
        amz_date,
        scope,
        sha256_hex(canonical_request.as_bytes())
    );

    let k_date = hmac(format!("AWS4{}", settings.secret_key).as_bytes(), date.as_bytes())?;
    let k_region = hmac(&k_date, settings.region.as_bytes())?;
    let k_service = hmac(&k_region, ROUTE53_SERVICE.as_bytes())?;
    let k_signing = hmac(&k_service, b"aws4_request")?;
    let signature = hex::encode(hmac(&k_signing, string_to_sign.as_bytes())?);

    Ok(Signature {
        authorization: format!(
            "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
            settings.access_key, scope, signed_headers, signature
        ),
        amz_date,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use mockito::Matcher;

    fn settings() -> DnsSettings {
        DnsSettings {
            access_key: "AKIDEXAMPLE".into(),
            secret_key: "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY".into(),
            hosted_zone: "example.com.".into(),
            hosted_zone_id: "/hostedzone/Z123".into(),
            region: "us-east-1".into(),
        }
    }

    #[test]
    fn test_change_batch_xml() {
        let record = DnsRecord::for_target("web.ns.example.com", "1.2.3.4");
        let xml = change_batch_xml("UPSERT", &record);
        assert!(xml.contains("<Action>UPSERT</Action>"));
        assert!(xml.contains("<Name>web.ns.example.com.</Name>"));
        assert!(xml.contains("<Type>A</Type>"));
        assert!(xml.contains("<TTL>60</TTL>"));
        assert!(xml.contains("<Value>1.2.3.4</Value>"));
    }

    #[test]
    fn test_signature_is_deterministic_and_scoped() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let request = SigningRequest {
            method: "POST",
            host: "route53.amazonaws.com",
            path: "/2013-04-01/hostedzone/Z123/rrset/",
            content_type: "application/xml",
            payload: b"<xml/>",
        };
        let first = sign_v4(&settings(), &request, now).unwrap();
        let second = sign_v4(&settings(), &request, now).unwrap();

        assert_eq!(first.amz_date, "20240501T120000Z");
        assert_eq!(first.authorization, second.authorization);
        assert!(first
            .authorization
            .starts_with("AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/20240501/us-east-1/route53/aws4_request"));
        assert!(first.authorization.contains("SignedHeaders=content-type;host;x-amz-date"));
    }

    #[test]
    fn test_requires_configuration() {
        let result = Route53Registrar::new(DnsSettings::default());
        assert!(matches!(result, Err(ProviderError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_upsert_posts_signed_change() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/2013-04-01/hostedzone/Z123/rrset/")
            .match_header("authorization", Matcher::Regex("^AWS4-HMAC-SHA256 ".into()))
            .match_body(Matcher::Regex("<Action>UPSERT</Action>".into()))
            .with_status(200)
            .with_body("<ChangeResourceRecordSetsResponse/>")
            .create_async()
            .await;

        let registrar = Route53Registrar::with_endpoint(settings(), &server.url()).unwrap();
        registrar
            .upsert(&DnsRecord::for_target("web.ns.example.com", "lb.elb.amazonaws.com"))
            .await
            .unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_delete_of_missing_record_is_absent() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/2013-04-01/hostedzone/Z123/rrset/")
            .with_status(400)
            .with_body("<Error><Code>InvalidChangeBatch</Code><Message>but it was not found</Message></Error>")
            .create_async()
            .await;

        let registrar = Route53Registrar::with_endpoint(settings(), &server.url()).unwrap();
        let outcome = registrar
            .delete(&DnsRecord::for_target("web.ns.example.com", "1.2.3.4"))
            .await
            .unwrap();
        assert_eq!(outcome, DeleteOutcome::Absent);
    }
}
