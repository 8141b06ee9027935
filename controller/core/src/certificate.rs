use chrono::{DateTime, Utc};
use mesh_controller_k8s_api::{self as k8s, SecretReference};
use std::{collections::BTreeMap, fmt, sync::Arc, time::Duration};

/// The principal identity of an issued certificate.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CommonName(String);

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum CertRole {
    Internal,
    Service,
    IngressGateway,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct IssueOptions {
    /// The common name is used verbatim, without appending a trust domain.
    pub full_cn_provided: bool,
    pub validity: Option<Duration>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IssuedCertificate {
    pub common_name: CommonName,
    pub cert_chain: Vec<u8>,
    pub private_key: Vec<u8>,
    pub trusted_cas: Vec<u8>,
    pub expires_at: DateTime<Utc>,
}

/// Describes a certificate that should exist in a secret.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CertificateSpec {
    pub subject_alt_names: Vec<String>,
    pub validity_duration: Option<String>,
    pub secret: SecretReference,
}

/// Issues and caches certificates by common name.
#[async_trait::async_trait]
pub trait Issuer: Send + Sync {
    async fn issue_certificate(
        &self,
        cn: &CommonName,
        role: CertRole,
        opts: IssueOptions,
    ) -> anyhow::Result<Arc<IssuedCertificate>>;

    /// Evicts the cached certificate for `cn`. Releasing an unknown name is a
    /// no-op.
    fn release_certificate(&self, cn: &CommonName);
}

/// Stores secret material by namespace and name.
#[async_trait::async_trait]
pub trait SecretStore: Send + Sync {
    async fn create_or_update_secret(
        &self,
        namespace: &str,
        name: &str,
        data: BTreeMap<String, Vec<u8>>,
        type_: &str,
    ) -> anyhow::Result<()>;

    async fn delete_secret(&self, namespace: &str, name: &str) -> anyhow::Result<()>;
}

/// Writes status updates for `AccessCert` resources.
#[async_trait::async_trait]
pub trait AccessCertStatusWriter: Send + Sync {
    async fn update_status(
        &self,
        namespace: &str,
        name: &str,
        status: k8s::AccessCertStatus,
    ) -> anyhow::Result<()>;
}

// === impl CommonName ===

impl CommonName {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for CommonName {
    fn from(cn: String) -> Self {
        Self(cn)
    }
}

impl From<&str> for CommonName {
    fn from(cn: &str) -> Self {
        Self(cn.to_string())
    }
}

impl fmt::Display for CommonName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// === impl CertificateSpec ===

impl CertificateSpec {
    /// The common name certificates are issued under.
    pub fn common_name(&self) -> Option<CommonName> {
        self.subject_alt_names.first().map(|san| san.as_str().into())
    }
}

impl From<&k8s::IngressGatewayCertSpec> for CertificateSpec {
    fn from(spec: &k8s::IngressGatewayCertSpec) -> Self {
        Self {
            subject_alt_names: spec.subject_alt_names.clone(),
            validity_duration: Some(spec.validity_duration.clone()),
            secret: spec.secret.clone(),
        }
    }
}

impl From<&k8s::AccessCertSpec> for CertificateSpec {
    fn from(spec: &k8s::AccessCertSpec) -> Self {
        Self {
            subject_alt_names: spec.subject_alt_names.clone(),
            validity_duration: None,
            secret: spec.secret.clone(),
        }
    }
}
