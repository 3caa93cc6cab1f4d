pub mod identity;

pub use identity::{identify, PackageIdentity};
