pub mod signer;

pub use self::signer::{LocalKeySigner, SigningBackend, SigningMethod};
