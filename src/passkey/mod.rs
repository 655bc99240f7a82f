//! Passkey application layer
//!
//! Credential storage, challenge bookkeeping, the two ceremonies and the
//! [`PasskeyService`] façade the HTTP handlers talk to.

pub mod authentication;
pub mod challenge;
pub mod registration;
pub mod service;
pub mod session;
pub mod store;

pub use authentication::{AuthenticationCeremony, AuthenticationOutcome};
pub use challenge::{CeremonyType, Challenge, ChallengeManager};
pub use registration::RegistrationCeremony;
pub use service::{
    ActivateRequest, AuthenticateRequest, DeleteRequest, PasskeyResponse, PasskeyService,
    PasskeyToggles, RegisterRequest,
};
pub use session::{Principal, SessionContext};
pub use store::{
    BlobStore, CredentialRecord, CredentialStore, CredentialSummary, FileBlobStore,
    MemoryBlobStore,
};
