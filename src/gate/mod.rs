//! Admission control: client identity, exemptions and the gate itself.

mod admission;
mod exempt;
mod resolver;

pub use admission::{Admission, AdmissionGate, RequestInfo};
pub use exempt::PathExemptions;
pub use resolver::{ClientKeyResolver, DEFAULT_FORWARDED_HEADER, UNKNOWN_CLIENT};
