//! Collapses bursts of refresh-worthy events into single announcements.
//!
//! Each domain's dispatcher holds at most one pending event. Every arrival
//! replaces it and pushes the sliding deadline out; the first arrival of a
//! batch also fixes a hard deadline. The pending event is published when
//! either deadline passes.

use crate::{metrics::DomainMetrics, PubSub};
use mesh_controller_core::{Kind, PubSubMessage};
use std::sync::Arc;
use tokio::{
    sync::mpsc,
    time::{self, Duration, Instant},
};
use tracing::{debug, trace};

/// The refresh domains whose announcements are coalesced.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Domain {
    Proxy,
    Ingress,
    Gateway,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Window {
    pub sliding: Duration,
    pub max: Duration,
}

#[derive(Debug)]
struct Pending {
    last: PubSubMessage,
    count: u64,
    sliding: Instant,
    max: Instant,
}

// === impl Domain ===

impl Domain {
    pub const ALL: [Self; 3] = [Self::Proxy, Self::Ingress, Self::Gateway];

    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Proxy => "proxy",
            Self::Ingress => "ingress",
            Self::Gateway => "gateway",
        }
    }

    /// The kind announced on the domain's broadcast topic.
    pub const fn broadcast_kind(&self) -> Kind {
        match self {
            Self::Proxy => Kind::ProxyUpdate,
            Self::Ingress => Kind::IngressUpdate,
            Self::Gateway => Kind::GatewayUpdate,
        }
    }
}

impl std::fmt::Display for Domain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.as_str().fmt(f)
    }
}

// === impl Window ===

impl Default for Window {
    fn default() -> Self {
        Self {
            sliding: Duration::from_secs(2),
            max: Duration::from_secs(10),
        }
    }
}

// === impl Pending ===

impl Pending {
    fn deadline(&self) -> Instant {
        self.sliding.min(self.max)
    }
}

/// Runs a domain's dispatcher until its input closes or shutdown is signaled.
///
/// A batch still pending at shutdown is dropped.
pub(crate) async fn dispatch(
    domain: Domain,
    window: Window,
    mut rx: mpsc::Receiver<PubSubMessage>,
    bus: Arc<PubSub>,
    metrics: DomainMetrics,
    shutdown: drain::Watch,
) {
    let topic = domain.broadcast_kind().as_str();
    let signaled = shutdown.signaled();
    tokio::pin!(signaled);

    let mut pending: Option<Pending> = None;
    let idle = time::sleep(Duration::ZERO);
    tokio::pin!(idle);

    loop {
        if let Some(p) = &pending {
            idle.as_mut().reset(p.deadline());
        }

        tokio::select! {
            biased;

            release = &mut signaled => {
                if let Some(p) = pending.take() {
                    debug!(events = p.count, "Dropping pending batch");
                }
                drop(release);
                return;
            }

            () = &mut idle, if pending.is_some() => {
                if let Some(Pending { last, count, .. }) = pending.take() {
                    debug!(%topic, events = count, "Announcing");
                    bus.publish(topic, &last);
                    metrics.broadcasts.inc();
                    metrics.batch_size.observe(count as f64);
                }
            }

            msg = rx.recv() => {
                let Some(msg) = msg else {
                    debug!("Input closed");
                    return;
                };
                metrics.dispatched.inc();
                let now = Instant::now();
                trace!(kind = %msg.kind, "Coalescing");
                pending = Some(match pending.take() {
                    None => Pending {
                        last: msg,
                        count: 1,
                        sliding: now + window.sliding,
                        max: now + window.max,
                    },
                    Some(p) => Pending {
                        last: msg,
                        count: p.count + 1,
                        sliding: now + window.sliding,
                        max: p.max,
                    },
                });
            }
        }
    }
}
