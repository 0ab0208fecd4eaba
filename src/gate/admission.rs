//! The admission decision for one request.

use axum::http::HeaderMap;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::debug;

use super::exempt::PathExemptions;
use super::resolver::ClientKeyResolver;
use crate::ratelimit::{Clock, Decision, RateTable, SystemClock};

/// What the gate needs to know about a request.
#[derive(Debug, Clone, Copy)]
pub struct RequestInfo<'a> {
    /// Address of the direct peer, if known
    pub peer: Option<IpAddr>,
    /// Request headers
    pub headers: &'a HeaderMap,
    /// Request path
    pub path: &'a str,
}

/// Result of running a request through the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The path is exempt; nothing was recorded
    Exempt,
    /// The call was recorded and is within the limit
    Admitted(Decision),
    /// The call was recorded and exceeds the limit
    Rejected(Decision),
}

impl Admission {
    /// Whether the request may proceed.
    pub fn is_allowed(&self) -> bool {
        !matches!(self, Admission::Rejected(_))
    }
}

/// Admission control in front of a handler.
///
/// Each gate owns a handle to its own [`RateTable`]; gates with different
/// policies can run side by side.
pub struct AdmissionGate {
    table: Arc<RateTable>,
    resolver: ClientKeyResolver,
    exemptions: PathExemptions,
    clock: Arc<dyn Clock>,
}

impl AdmissionGate {
    /// Create a gate using the system clock.
    pub fn new(
        table: Arc<RateTable>,
        resolver: ClientKeyResolver,
        exemptions: PathExemptions,
    ) -> Self {
        Self {
            table,
            resolver,
            exemptions,
            clock: Arc::new(SystemClock),
        }
    }

    /// Replace the clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// The table this gate records into.
    pub fn table(&self) -> &Arc<RateTable> {
        &self.table
    }

    /// Decide whether a request is admitted, recording it if it is not exempt.
    pub fn check(&self, request: &RequestInfo<'_>) -> Admission {
        if self.exemptions.is_exempt(request.path) {
            return Admission::Exempt;
        }

        let key = self.resolver.resolve(request.peer, request.headers);
        let decision = self.table.evaluate(&key, self.clock.now());

        if decision.admitted {
            Admission::Admitted(decision)
        } else {
            debug!(
                key = %key,
                path = %request.path,
                count = decision.count,
                limit = decision.limit,
                "Rate limit exceeded"
            );
            Admission::Rejected(decision)
        }
    }
}
