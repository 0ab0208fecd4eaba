//! HTTP surface for the admission gate.

mod layer;
mod server;

pub use layer::{too_many_requests, GateLayer, GateService};
pub use server::HttpServer;
