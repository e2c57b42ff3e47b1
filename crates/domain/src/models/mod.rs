pub mod enroll;
pub mod message;
pub mod policy;
pub mod public_key;
pub mod unenroll;

pub use enroll::{CompletedEnroll, EnrollStatus, PendingRecord, STATUS_COMPLETED, STATUS_PENDING};
pub use message::{
    DeviceCertificate, EnrollCommand, EnrollErrorMessage, EnrollKind, EnrolledMessage,
    UnenrollCompleted,
};
pub use policy::{Policy, PolicyData, SUPPORTED_POLICY_VERSION};
pub use public_key::PublicKey;
pub use unenroll::UnenrollStatus;
