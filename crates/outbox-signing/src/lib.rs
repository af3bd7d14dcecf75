//! Outbox Signing
//!
//! Client-side orchestration of one registration: find the signing agent,
//! offer eligible credentials, sign the prepared artifact's exact bytes and
//! hand the result to the ledger.
//!
//! # Components
//!
//! - [`SessionState`]: explicit state machine with validated transitions
//! - [`SigningSession`]: per-attempt state, cancellable from another task
//! - [`SigningOrchestrator`]: discovery polling, signing, submission retries
//! - [`SigningAgent`] / [`LedgerGateway`]: seams to the key holder and the server
//! - [`SoftTokenAgent`]: in-memory ed25519 agent for headless use
//!
//! # Example
//!
//! ```rust,ignore
//! let orchestrator = SigningOrchestrator::new(agent, artifacts, gateway, OrchestratorConfig::default());
//! let mut session = orchestrator.open(ticket);
//! let entry = orchestrator.run(&mut session, &FirstEligible).await?;
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod agent;
mod error;
mod gateway;
mod orchestrator;
mod session;
mod soft;
mod state;

pub use agent::{common_name_of, AgentError, Credential, SigningAgent};
pub use error::SigningError;
pub use gateway::{ArtifactSource, GatewayError, LedgerGateway, StoreArtifactSource};
pub use orchestrator::{CredentialChooser, FirstEligible, OrchestratorConfig, SigningOrchestrator};
pub use session::{CancelHandle, RegistrationTicket, SigningSession};
pub use soft::SoftTokenAgent;
pub use state::{allowed_transitions, validate_transition, SessionState, Transition};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
