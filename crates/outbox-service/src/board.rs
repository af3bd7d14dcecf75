//! Project-board adapter
//!
//! The board supplies cards: a title (read as the addressee), participants
//! (one role is the executor) and attached files (templates).

use async_trait::async_trait;
use dashmap::DashMap;
use outbox_artifact::{ArtifactError, CardId, TemplateSource};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Participant role treated as the executor unless configured otherwise
pub const EXECUTOR_ROLE: u8 = 2;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardMember {
    pub user_id: u64,
    pub full_name: String,
    #[serde(rename = "type")]
    pub role: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardFile {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Card {
    pub id: CardId,
    pub title: String,
    #[serde(default)]
    pub members: Vec<CardMember>,
    #[serde(default)]
    pub files: Vec<CardFile>,
}

impl Card {
    #[must_use]
    pub fn member_with_role(&self, role: u8) -> Option<&CardMember> {
        self.members.iter().find(|m| m.role == role)
    }

    #[must_use]
    pub fn file(&self, name: &str) -> Option<&CardFile> {
        self.files.iter().find(|f| f.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BoardError {
    #[error("card {0} not found")]
    CardNotFound(CardId),

    #[error("card {card_id} has no file {file_name}")]
    FileNotFound { card_id: CardId, file_name: String },

    #[error("board unavailable: {0}")]
    Unavailable(String),
}

impl From<reqwest::Error> for BoardError {
    fn from(value: reqwest::Error) -> Self {
        Self::Unavailable(value.to_string())
    }
}

#[async_trait]
pub trait ProjectBoard: Send + Sync {
    async fn card(&self, card_id: CardId) -> Result<Card, BoardError>;

    async fn download(&self, file: &CardFile) -> Result<Vec<u8>, BoardError>;
}

/// Board REST API with bearer authentication
pub struct HttpBoard {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HttpBoard {
    /// # Errors
    /// `Unavailable` if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Result<Self, BoardError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(15))
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
        })
    }

    fn get(&self, url: &str) -> reqwest::RequestBuilder {
        let request = self.client.get(url);
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

#[async_trait]
impl ProjectBoard for HttpBoard {
    async fn card(&self, card_id: CardId) -> Result<Card, BoardError> {
        let url = format!("{}/cards/{card_id}", self.base_url);
        debug!(%url, "fetching card");
        let response = self.get(&url).send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(BoardError::CardNotFound(card_id));
        }
        Ok(response.error_for_status()?.json::<Card>().await?)
    }

    async fn download(&self, file: &CardFile) -> Result<Vec<u8>, BoardError> {
        let response = self.get(&file.url).send().await?.error_for_status()?;
        Ok(response.bytes().await?.to_vec())
    }
}

/// Cards and files held in memory
#[derive(Debug, Default)]
pub struct MemoryBoard {
    cards: DashMap<CardId, Card>,
    files: DashMap<String, Vec<u8>>,
}

impl MemoryBoard {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a card with its executor and files
    pub fn put_card(&self, card_id: CardId, title: &str, executor: Option<CardMember>, files: Vec<(String, Vec<u8>)>) {
        let files = files
            .into_iter()
            .map(|(name, bytes)| {
                let url = format!("memory://{card_id}/{name}");
                let file = CardFile {
                    name,
                    url: url.clone(),
                    size: bytes.len() as u64,
                };
                self.files.insert(url, bytes);
                file
            })
            .collect();
        self.cards.insert(
            card_id,
            Card {
                id: card_id,
                title: title.to_string(),
                members: executor.into_iter().collect(),
                files,
            },
        );
    }
}

#[async_trait]
impl ProjectBoard for MemoryBoard {
    async fn card(&self, card_id: CardId) -> Result<Card, BoardError> {
        self.cards
            .get(&card_id)
            .map(|card| card.clone())
            .ok_or(BoardError::CardNotFound(card_id))
    }

    async fn download(&self, file: &CardFile) -> Result<Vec<u8>, BoardError> {
        self.files
            .get(&file.url)
            .map(|bytes| bytes.clone())
            .ok_or_else(|| BoardError::Unavailable(format!("no content at {}", file.url)))
    }
}

/// Fetches templates attached to board cards
#[derive(Clone)]
pub struct BoardTemplateSource {
    board: Arc<dyn ProjectBoard>,
}

impl BoardTemplateSource {
    pub fn new(board: Arc<dyn ProjectBoard>) -> Self {
        Self { board }
    }
}

#[async_trait]
impl TemplateSource for BoardTemplateSource {
    async fn fetch(&self, card_id: CardId, file_name: &str) -> Result<Vec<u8>, ArtifactError> {
        let card = self
            .board
            .card(card_id)
            .await
            .map_err(|e| ArtifactError::SourceUnavailable(e.to_string()))?;
        let file = card.file(file_name).ok_or_else(|| {
            ArtifactError::SourceUnavailable(
                BoardError::FileNotFound {
                    card_id,
                    file_name: file_name.to_string(),
                }
                .to_string(),
            )
        })?;
        self.board
            .download(file)
            .await
            .map_err(|e| ArtifactError::SourceUnavailable(e.to_string()))
    }
}
