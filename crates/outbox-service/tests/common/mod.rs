#![allow(dead_code)]

use chrono::{Duration as ChronoDuration, Utc};
use ed25519_dalek::SigningKey;
use outbox_artifact::CardId;
use outbox_ledger::{JournalEntry, JournalFilter, NumberingRule};
use outbox_service::board::{CardMember, EXECUTOR_ROLE};
use outbox_service::bootstrap::build;
use outbox_service::config::TrustedKey;
use outbox_service::{FixedClock, LocalGateway, MemoryBoard, PrepareRequest, Registration, RegistrationService, ServiceConfig};
use outbox_signing::{FirstEligible, OrchestratorConfig, SigningOrchestrator, SoftTokenAgent};
use outbox_test_utils::{date, outgoing_template, plain_copy};
use rand::rngs::OsRng;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

pub const LETTER: CardId = CardId(1);
pub const NO_EXECUTOR: CardId = CardId(2);
pub const TEMPLATE: &str = "исх_letter.docx";

pub struct Harness {
    pub dir: TempDir,
    pub config: ServiceConfig,
    pub board: Arc<MemoryBoard>,
    pub clock: Arc<FixedClock>,
    pub agent: Arc<SoftTokenAgent>,
    pub service: Arc<RegistrationService>,
}

pub fn executor() -> CardMember {
    CardMember {
        user_id: 17,
        full_name: "Petrova Anna".to_string(),
        role: EXECUTOR_ROLE,
    }
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    pub fn with_config(tweak: impl FnOnce(&mut ServiceConfig)) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let key = SigningKey::generate(&mut OsRng);

        let mut config = ServiceConfig::default();
        config.storage.data_dir = dir.path().to_path_buf();
        config.board.mock = true;
        config.numbering.executors.insert(
            "17".to_string(),
            NumberingRule {
                executor_code: "10".to_string(),
                format: "{number}-{executor_code}".to_string(),
                start_number: 1,
            },
        );
        config.signing.trusted_keys.push(TrustedKey {
            public_key: hex::encode(key.verifying_key().to_bytes()),
            common_name: Some("Ivanov Ivan".to_string()),
        });
        tweak(&mut config);

        let agent = Arc::new(
            SoftTokenAgent::new()
                .with_key("CN=Ivanov Ivan, O=Ministry", key)
                .with_certificate("CN=Expired Key", true, Utc::now() - ChronoDuration::days(3))
                .with_certificate("CN=Public Only", false, Utc::now() + ChronoDuration::days(300)),
        );

        let board = Arc::new(MemoryBoard::new());
        board.put_card(
            LETTER,
            "Ministry of Finance",
            Some(executor()),
            vec![
                (TEMPLATE.to_string(), outgoing_template()),
                ("copy.docx".to_string(), plain_copy()),
                ("scan.pdf".to_string(), b"%PDF-1.4".to_vec()),
            ],
        );
        board.put_card(
            NO_EXECUTOR,
            "Nobody assigned",
            None,
            vec![(TEMPLATE.to_string(), outgoing_template())],
        );

        let clock = Arc::new(FixedClock::new(date(2024, 3, 5)));
        let service = Arc::new(build(&config, board.clone(), clock.clone()).unwrap());
        Self {
            dir,
            config,
            board,
            clock,
            agent,
            service,
        }
    }

    /// A second service over the same data directory
    pub fn reopen(&self) -> Arc<RegistrationService> {
        Arc::new(build(&self.config, self.board.clone(), self.clock.clone()).unwrap())
    }

    pub fn orchestrator(&self) -> SigningOrchestrator {
        let gateway = Arc::new(LocalGateway::new(self.service.clone()));
        SigningOrchestrator::new(
            self.agent.clone(),
            gateway.clone(),
            gateway,
            OrchestratorConfig {
                discovery_interval: Duration::from_millis(5),
                submit_backoff: Duration::from_millis(5),
                ..OrchestratorConfig::default()
            },
        )
    }

    pub async fn prepare(&self) -> Registration {
        self.service
            .prepare_registration(&PrepareRequest {
                card_id: LETTER,
                selected_file_name: TEMPLATE.to_string(),
            })
            .await
            .unwrap()
    }

    pub async fn sign(&self, registration: &Registration) -> JournalEntry {
        let orchestrator = self.orchestrator();
        let mut session = orchestrator.open(registration.ticket());
        orchestrator.run(&mut session, &FirstEligible).await.unwrap()
    }

    pub async fn register(&self) -> JournalEntry {
        let registration = self.prepare().await;
        self.sign(&registration).await
    }

    pub fn entries(&self) -> Vec<JournalEntry> {
        self.service
            .list(&JournalFilter::default(), 0, 1000, None)
            .unwrap()
            .entries
    }
}
