pub mod healthcheck;

pub use healthcheck::{HealthcheckPinger, MAX_BODY_BYTES};
