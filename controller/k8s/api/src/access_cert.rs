use crate::SecretReference;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Requests a certificate for an external service, stored in a secret.
#[derive(Clone, Debug, Default, PartialEq, Eq, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "policy.flomesh.io",
    version = "v1alpha1",
    kind = "AccessCert",
    status = "AccessCertStatus",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct AccessCertSpec {
    #[serde(default)]
    pub subject_alt_names: Vec<String>,

    #[serde(default)]
    pub secret: SecretReference,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AccessCertStatus {
    pub current_status: String,
    pub reason: String,
}

pub const STATUS_VALID: &str = "valid";
pub const STATUS_ERROR: &str = "error";
pub const STATUS_COMMITTED: &str = "committed";

impl AccessCertStatus {
    pub fn committed() -> Self {
        Self {
            current_status: STATUS_COMMITTED.to_string(),
            reason: "successfully committed by the system".to_string(),
        }
    }

    pub fn error(reason: impl ToString) -> Self {
        Self {
            current_status: STATUS_ERROR.to_string(),
            reason: reason.to_string(),
        }
    }
}
