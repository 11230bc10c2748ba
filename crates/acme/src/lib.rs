#![forbid(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::significant_drop_tightening)]
#![allow(clippy::must_use_candidate)]

//! RFC 8555 ACME istemci kütüphanesi.
//!
//! Çekirdek, sertifika başına çalışan yaşam döngüsü işçisidir: order
//! gönderimi, challenge çözümü, finalize ve indirme adımlarını yürütür,
//! ardından yenilemeleri süresiz zamanlar. İmzalı istek katmanı replay
//! nonce havuzunu ve badNonce yeniden denemelerini yönetir; HTTP-01
//! responder'ı doğrulama isteklerini yanıtlar ve istenirse diğer HTTP
//! trafiğini upstream'e şeffaf iletir.
//!
//! Kütüphane TLS sonlandırmaz; edinilen sertifikalar kayıt üzerinden
//! (`wait_for_certificate`, olay kanalları, rustls çözücüsü) tüketiciye
//! sunulur.

mod account;
mod authorization;
mod certificate;
mod client;
mod directory;
mod jws;
mod nonce;
mod order;
mod problem;
mod registry;
mod solver;
mod store;
mod tls;
mod transport;
mod wait;
mod worker;

pub use account::{AccountContact, AccountData, AccountError};
pub use authorization::{
    Authorization, AuthorizationError, AuthorizationStatus, Challenge, ChallengeData,
    ChallengeKind, ChallengeStatus,
};
pub use certificate::{
    decode_pem_chain, default_renewal_time, encode_pem_chain, CertificateData, CertificateError,
    CertificateKey, KeyAlgorithm,
};
pub use client::{
    AccountKeyGenerator, CertificateEvent, CertificateKeyGenerator, Client, ClientConfig,
    ClientError, RenewalTimeFn,
};
pub use directory::{Directory, DirectoryError, DirectoryMeta};
pub use jws::{AccountKey, AcmeJws, Jwk, JwsError, KeyBinding};
pub use nonce::{NonceError, NoncePool, ReplayNonce, REPLAY_NONCE_HEADER};
pub use order::{Identifier, IdentifierKind, NewOrder, Order, OrderError, OrderStatus};
pub use problem::{ProblemDetails, ProblemType};
pub use solver::{HttpChallengeSolver, HttpSolverConfig, SolverError};
pub use store::{DataStore, FileSystemDataStore, StoreError};
pub use tls::{certified_key, ManagedCertResolver, TlsError};
pub use transport::{retry_after_delay, ResponseParts, Transport, TransportError};
pub use wait::{StopSignal, VerificationWaiter, WaitError};
