use crate::Error;
use mesh_controller_core::{
    AccessCertStatusWriter, CertRole, CertificateSpec, CommonName, IssueOptions,
    IssuedCertificate, Issuer, Kind, PubSubMessage, SecretStore,
};
use mesh_controller_k8s_api::{self as k8s, AccessCertStatus, GoDuration, ResourceExt};
use mesh_controller_messaging::PubSub;
use std::{collections::BTreeMap, sync::Arc, time::Duration};
use tracing::{debug, error, info, warn};

const SECRET_TYPE_TLS: &str = "kubernetes.io/tls";

const ACCESS_CERT_DISABLED: &str = "issuing certificates for external services is disabled";

const KUBE_TOPICS: &[Kind] = &[
    Kind::MeshConfigAdded,
    Kind::MeshConfigUpdated,
    Kind::AccessCertAdded,
    Kind::AccessCertUpdated,
    Kind::AccessCertDeleted,
];

/// Keeps certificate secrets in step with the ingress-gateway spec of the
/// mesh config and with `AccessCert` resources.
pub struct Reconciler {
    issuer: Arc<dyn Issuer>,
    secrets: Arc<dyn SecretStore>,
    statuses: Arc<dyn AccessCertStatusWriter>,

    access_cert_policy: bool,
    ingress_gateway: Option<k8s::IngressGatewayCertSpec>,
    access_certs: BTreeMap<CommonName, CertificateSpec>,
}

// === impl Reconciler ===

impl Reconciler {
    pub fn new(
        issuer: Arc<dyn Issuer>,
        secrets: Arc<dyn SecretStore>,
        statuses: Arc<dyn AccessCertStatusWriter>,
        mesh_config: &k8s::MeshConfigSpec,
    ) -> Self {
        Self {
            issuer,
            secrets,
            statuses,
            access_cert_policy: mesh_config.feature_flags.enable_access_cert_policy,
            ingress_gateway: None,
            access_certs: BTreeMap::new(),
        }
    }

    /// Issues the ingress-gateway certificate configured in `mesh_config`,
    /// if any. On failure the spec is left unset so that the next mesh
    /// config event retries.
    pub async fn provision(&mut self, mesh_config: &k8s::MeshConfigSpec) {
        let Some(spec) = mesh_config.certificate.ingress_gateway.as_ref() else {
            return;
        };
        match self
            .issue_and_store(&spec.into(), CertRole::IngressGateway)
            .await
        {
            Ok(()) => self.ingress_gateway = Some(spec.clone()),
            Err(error) => error!(%error, "Failed to provision the ingress gateway certificate"),
        }
    }

    /// Handles announcements until shutdown is signaled or a bus closes.
    pub async fn run(mut self, kube: Arc<PubSub>, cert: Arc<PubSub>, shutdown: drain::Watch) {
        let topics = KUBE_TOPICS.iter().map(Kind::as_str).collect::<Vec<_>>();
        let mut kube_sub = kube.subscribe(&topics);
        let mut cert_sub = cert.subscribe(&[Kind::CertificateRotated.as_str()]);

        let signaled = shutdown.signaled();
        tokio::pin!(signaled);

        let release = loop {
            tokio::select! {
                biased;

                release = &mut signaled => break Some(release),

                msg = kube_sub.recv() => match msg {
                    Some(msg) => self.handle(msg).await,
                    None => {
                        warn!("Kube bus closed");
                        break None;
                    }
                },

                msg = cert_sub.recv() => match msg {
                    Some(msg) => self.handle(msg).await,
                    None => {
                        warn!("Certificate bus closed");
                        break None;
                    }
                },
            }
        };

        debug!("Stopping certificate reconciler");
        kube.unsubscribe(kube_sub);
        cert.unsubscribe(cert_sub);
        drop(release);
    }

    pub async fn handle(&mut self, msg: PubSubMessage) {
        match msg.kind {
            Kind::MeshConfigAdded | Kind::MeshConfigUpdated => {
                match msg.new.as_ref().and_then(|o| o.as_mesh_config()) {
                    Some(mc) => self.on_mesh_config(&mc.spec).await,
                    None => unexpected(&msg),
                }
            }

            Kind::AccessCertAdded | Kind::AccessCertUpdated | Kind::AccessCertDeleted => {
                let old = msg.old.as_ref().and_then(|o| o.as_access_cert());
                let new = msg.new.as_ref().and_then(|o| o.as_access_cert());
                if old.is_none() && new.is_none() {
                    return unexpected(&msg);
                }
                self.on_access_cert(old.map(|ac| &**ac), new.map(|ac| &**ac))
                    .await;
            }

            Kind::CertificateRotated => match msg.new.as_ref().and_then(|o| o.as_certificate()) {
                Some(cert) => self.on_rotated(cert).await,
                None => unexpected(&msg),
            },

            kind => debug!(%kind, "Ignoring"),
        }
    }

    async fn on_mesh_config(&mut self, mesh_config: &k8s::MeshConfigSpec) {
        self.access_cert_policy = mesh_config.feature_flags.enable_access_cert_policy;

        let new = mesh_config.certificate.ingress_gateway.as_ref();
        if self.ingress_gateway.as_ref() == new {
            debug!("Ingress gateway certificate spec is unchanged");
            return;
        }

        match (self.ingress_gateway.as_ref(), new) {
            (Some(current), None) => {
                let spec = CertificateSpec::from(current);
                if let Err(error) = self.remove(&spec).await {
                    error!(%error, "Failed to remove the ingress gateway certificate");
                    return;
                }
                info!(secret = %spec.secret, "Removed the ingress gateway certificate");
            }
            (_, Some(new)) => {
                if let Err(error) = self
                    .issue_and_store(&new.into(), CertRole::IngressGateway)
                    .await
                {
                    error!(%error, "Failed to update the ingress gateway certificate");
                    return;
                }
                info!(secret = %new.secret, "Updated the ingress gateway certificate");
            }
            (None, None) => {}
        }
        self.ingress_gateway = new.cloned();
    }

    async fn on_access_cert(&mut self, old: Option<&k8s::AccessCert>, new: Option<&k8s::AccessCert>) {
        if let Some(new) = new {
            if !self.access_cert_policy {
                let namespace = new.namespace().unwrap_or_default();
                let name = new.name_any();
                warn!(%namespace, %name, "Access certificate requested while issuance is disabled");
                self.write_status(new, AccessCertStatus::error(ACCESS_CERT_DISABLED))
                    .await;
                return;
            }
        }

        if let Some(old) = old {
            let spec = CertificateSpec::from(&old.spec);
            if let Some(cn) = spec.common_name() {
                self.access_certs.remove(&cn);
            }
            if let Err(error) = self.remove(&spec).await {
                error!(%error, "Failed to remove the old access certificate");
                if let Some(new) = new {
                    self.write_status(new, AccessCertStatus::error(&error)).await;
                }
                return;
            }
        }

        let Some(new) = new else {
            return;
        };
        let spec = CertificateSpec::from(&new.spec);
        match self.issue_and_store(&spec, CertRole::Service).await {
            Ok(()) => {
                if let Some(cn) = spec.common_name() {
                    self.access_certs.insert(cn, spec);
                }
                self.write_status(new, AccessCertStatus::committed()).await;
            }
            Err(error) => {
                error!(%error, "Failed to issue the access certificate");
                self.write_status(new, AccessCertStatus::error(&error)).await;
            }
        }
    }

    async fn on_rotated(&mut self, cert: &IssuedCertificate) {
        let cn = &cert.common_name;

        if let Some(current) = self.ingress_gateway.as_ref() {
            let spec = CertificateSpec::from(current);
            if spec.common_name().as_ref() == Some(cn) {
                info!(%cn, "Ingress gateway certificate was rotated");
                if let Err(error) = self.issue_and_store(&spec, CertRole::IngressGateway).await {
                    error!(%error, "Failed to store the rotated ingress gateway certificate");
                }
                return;
            }
        }

        if let Some(spec) = self.access_certs.get(cn) {
            info!(%cn, "Access certificate was rotated");
            if let Err(error) = self.issue_and_store(spec, CertRole::Service).await {
                error!(%error, "Failed to store the rotated access certificate");
            }
        }
    }

    /// Validates `spec`, issues a fresh certificate for its first SAN and
    /// upserts it into the referenced TLS secret.
    pub async fn issue_and_store(&self, spec: &CertificateSpec, role: CertRole) -> Result<(), Error> {
        let cn = spec.common_name().ok_or(Error::NoSubjectAltNames)?;
        let validity = spec
            .validity_duration
            .as_deref()
            .map(parse_validity)
            .transpose()?;
        if !spec.secret.is_set() {
            return Err(Error::InvalidSecret(spec.secret.clone()));
        }

        self.issuer.release_certificate(&cn);
        let opts = IssueOptions {
            full_cn_provided: true,
            validity,
        };
        let cert = self
            .issuer
            .issue_certificate(&cn, role, opts)
            .await
            .map_err(|error| Error::Issue {
                cn: cn.clone(),
                error,
            })?;

        let data = BTreeMap::from([
            ("ca.crt".to_string(), cert.trusted_cas.clone()),
            ("tls.crt".to_string(), cert.cert_chain.clone()),
            ("tls.key".to_string(), cert.private_key.clone()),
        ]);
        self.secrets
            .create_or_update_secret(
                &spec.secret.namespace,
                &spec.secret.name,
                data,
                SECRET_TYPE_TLS,
            )
            .await
            .map_err(|error| Error::Store {
                secret: spec.secret.clone(),
                error,
            })?;
        debug!(%cn, secret = %spec.secret, "Stored certificate");
        Ok(())
    }

    /// Deletes the secret, then releases the cached certificate.
    async fn remove(&self, spec: &CertificateSpec) -> Result<(), Error> {
        self.secrets
            .delete_secret(&spec.secret.namespace, &spec.secret.name)
            .await
            .map_err(|error| Error::Delete {
                secret: spec.secret.clone(),
                error,
            })?;
        if let Some(cn) = spec.common_name() {
            self.issuer.release_certificate(&cn);
        }
        Ok(())
    }

    async fn write_status(&self, ac: &k8s::AccessCert, status: AccessCertStatus) {
        let namespace = ac.namespace().unwrap_or_default();
        let name = ac.name_any();
        if let Err(error) = self.statuses.update_status(&namespace, &name, status).await {
            error!(%namespace, %name, %error, "Failed to update AccessCert status");
        }
    }
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("access_cert_policy", &self.access_cert_policy)
            .field("ingress_gateway", &self.ingress_gateway)
            .field("access_certs", &self.access_certs.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

fn parse_validity(value: &str) -> Result<Duration, Error> {
    value
        .parse::<GoDuration>()
        .map(Duration::from)
        .map_err(|source| Error::InvalidDuration {
            value: value.to_string(),
            source,
        })
}

fn unexpected(msg: &PubSubMessage) {
    let observed = msg
        .new
        .as_ref()
        .or(msg.old.as_ref())
        .map_or("None", |o| o.type_name());
    error!(kind = %msg.kind, observed, "Unexpected payload type");
}
