//! Bridge between a node's block-template API and Stratum-style workers.
//!
//! The node is polled for block templates ([`template_source`]), each
//! template is assembled into a job ([`job`]) and broadcast to every
//! authorized worker ([`broadcaster`]). Workers talk to the
//! [`stratum`] server; the shares they submit are signed and forwarded to
//! an accounting service ([`reporter`]).

pub mod broadcaster;
pub mod config;
pub mod credentials;
pub mod daemon;
pub mod job;
pub mod reporter;
pub mod stratum;
pub mod template_source;
pub mod tls;
pub mod tracing;
