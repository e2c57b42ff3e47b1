pub mod enroll;
pub mod policy;
pub mod public_key;
pub mod unenroll;

pub use enroll::EnrollRepository;
pub use policy::PolicyRepository;
pub use public_key::PublicKeyRepository;
pub use unenroll::UnenrollRepository;

use std::time::Instant;

use metrics::histogram;

/// Records the latency of a database operation.
pub(crate) fn observe_db(operation: &'static str, start: Instant) {
    histogram!("enroll_db_seconds", "operation" => operation).record(start.elapsed().as_secs_f64());
}
