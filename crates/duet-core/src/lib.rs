//! Shared vocabulary for the duet workspace: error taxonomy, the wire
//! record that crosses worker/pool boundaries, process-wide configuration,
//! the registered-function task codec, and pluggable execution substrates.
//!
//! `duet-pool` and `duet-promise` both depend on this crate rather than on
//! each other, keeping the pool and promise models independently usable as
//! two distinct but complementary concurrency models.

pub mod codec;
pub mod config;
pub mod error;
pub mod record;
pub mod substrate;

pub use config::{reset_config, Config};
pub use error::{DuetError, DuetResult};
pub use record::{decode_error, encode_error, is_error, ErrorRecord};
pub use substrate::{
    select_pool_substrate, select_promise_substrate, PoolSubstrate, PromiseSubstrate,
    TokioSubstrate,
};
