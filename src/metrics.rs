//! Prometheus metrics for the consensus engine.
//!
//! One instance per engine, namespaced by `Parameters::namespace` so
//! several chains can share a registry. Metrics failing to initialize or
//! register is logged and non-fatal: the engine keeps running and the
//! counters become no-ops.

use prometheus::{IntCounter, IntGauge, Opts, Registry};

/// Vertex decision counters.
pub struct Metrics {
    inner: Option<Inner>,
}

struct Inner {
    issued: IntCounter,
    accepted: IntCounter,
    rejected: IntCounter,
    processing: IntGauge,
}

impl Inner {
    fn new(namespace: &str, registry: &Registry) -> prometheus::Result<Self> {
        let issued = IntCounter::with_opts(
            Opts::new("vertices_issued_total", "Vertices inserted into the live graph")
                .namespace(namespace.to_string()),
        )?;
        let accepted = IntCounter::with_opts(
            Opts::new("vertices_accepted_total", "Vertices driven to Accepted")
                .namespace(namespace.to_string()),
        )?;
        let rejected = IntCounter::with_opts(
            Opts::new("vertices_rejected_total", "Vertices driven to Rejected")
                .namespace(namespace.to_string()),
        )?;
        let processing = IntGauge::with_opts(
            Opts::new("vertices_processing", "Vertices currently awaiting a decision")
                .namespace(namespace.to_string()),
        )?;

        registry.register(Box::new(issued.clone()))?;
        registry.register(Box::new(accepted.clone()))?;
        registry.register(Box::new(rejected.clone()))?;
        registry.register(Box::new(processing.clone()))?;

        Ok(Inner {
            issued,
            accepted,
            rejected,
            processing,
        })
    }
}

impl Metrics {
    pub fn new(namespace: &str, registry: &Registry) -> Self {
        match Inner::new(namespace, registry) {
            Ok(inner) => Metrics { inner: Some(inner) },
            Err(error) => {
                tracing::warn!(%error, "Failed to register consensus metrics; continuing without");
                Metrics { inner: None }
            }
        }
    }

    pub(crate) fn issued(&self) {
        if let Some(m) = &self.inner {
            m.issued.inc();
            m.processing.inc();
        }
    }

    pub(crate) fn accepted(&self) {
        if let Some(m) = &self.inner {
            m.accepted.inc();
            m.processing.dec();
        }
    }

    pub(crate) fn rejected(&self) {
        if let Some(m) = &self.inner {
            m.rejected.inc();
            m.processing.dec();
        }
    }
}
