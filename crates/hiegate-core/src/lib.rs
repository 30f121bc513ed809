pub mod cert;
pub mod channel;
pub mod dispatch;
pub mod error;
pub mod identity;
pub mod keystore;
pub mod mediator;
pub mod store;

pub use cert::{CertificateInfo, fingerprint_hex};
pub use channel::{Channel, ChannelStatus, ContentMatchRule, RewriteRule, Route, RouteProtocol};
pub use dispatch::{
    ClientResponse, DispatchResult, RequestSnapshot, ResponseSnapshot, RouteOutcome, SetCookie,
};
pub use error::{CoreError, Result};
pub use identity::{ClientIdentity, ClientRecord, PeerCertificate};
pub use keystore::{Keystore, TrustedCert};
pub use mediator::{
    MEDIATOR_CONTENT_TYPE, MediatorError, MediatorMetric, MediatorResponse, Orchestration,
    OrchestrationMessage, is_mediator_content_type,
};
pub use store::{Authorizer, ChannelStore, KeystoreProvider, TransactionRecorder};
