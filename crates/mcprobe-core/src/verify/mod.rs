pub mod result;
pub mod verifier;

pub use result::{Capabilities, VerificationResult, VerificationStatus};
pub use verifier::Verifier;
