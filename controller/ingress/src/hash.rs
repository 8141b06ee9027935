use crate::route::{IngressRouteSpec, IngressRoutes, ServiceRoutes};
use serde::Serialize;
use std::fmt::Write;

/// Hex-encoded SHA-256 of a value's JSON serialization.
///
/// Callers must sort any lists whose order is not meaningful; maps are
/// serialized in key order.
pub fn content_hash<T: Serialize>(value: &T) -> serde_json::Result<String> {
    let json = serde_json::to_vec(value)?;
    let digest = ring::digest::digest(&ring::digest::SHA256, &json);
    let mut hex = String::with_capacity(digest.as_ref().len() * 2);
    for b in digest.as_ref() {
        let _ = write!(hex, "{b:02x}");
    }
    Ok(hex)
}

impl ServiceRoutes {
    /// Sorts routes and targets and records their hash.
    pub(crate) fn seal(&mut self) -> serde_json::Result<()> {
        for route in &mut self.routes {
            route.targets.sort();
        }
        self.routes.sort();
        self.hash = content_hash(&self.routes)?;
        Ok(())
    }
}

impl IngressRoutes {
    /// Sorts routes and endpoints and records their hash. Hosts and paths are
    /// part of the hash even though the artifact carries them only as keys.
    pub(crate) fn seal(&mut self) -> serde_json::Result<()> {
        for route in &mut self.routes {
            if let Some(upstream) = route.balancer.upstream.as_mut() {
                upstream.endpoints.sort();
            }
        }
        self.routes.sort_by(|a, b| {
            (&a.router.host, &a.router.path, &a.router.service).cmp(&(
                &b.router.host,
                &b.router.path,
                &b.router.service,
            ))
        });
        let keyed = self
            .routes
            .iter()
            .map(|r| (&r.router.host, &r.router.path, r))
            .collect::<Vec<(&String, &String, &IngressRouteSpec)>>();
        self.hash = content_hash(&keyed)?;
        Ok(())
    }
}
