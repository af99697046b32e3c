//! Gateway: the webhook HTTP endpoint.
//!
//! Single port, single path: GET for health probes, POST for Lark event
//! callbacks. Every handled POST answers 200; the platform gains nothing
//! from retrying, so downstream failures are reported in the body instead.

mod server;

pub use server::run_gateway;
