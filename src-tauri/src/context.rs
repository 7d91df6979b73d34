//! Shared application state used by both front ends.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context as _;
use tracing::{info, warn};

use crate::analysis::{AnalysisError, BillAnalysis, BillAnalyst};
use crate::chatbot::{ChatReply, Chatbot};
use crate::config::{AppConfig, ProviderKind};
use crate::db::SqliteSessionStore;
use crate::doc_processor::{has_sufficient_text, is_allowed_file, DocumentExtractor};
use crate::knowledge::KnowledgeBase;
use crate::llm::ModelClient;
use crate::rag::Retriever;
use crate::session::{EvictionPolicy, MemorySessionStore, SessionStore, StoreError};

pub const INSUFFICIENT_EXTRACTION_MESSAGE: &str = "Impossibile estrarre testo sufficiente dal documento. Assicurati che il documento sia leggibile.";

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("Tipo di file non consentito")]
    UnsupportedType,
    #[error("{}", INSUFFICIENT_EXTRACTION_MESSAGE)]
    InsufficientText { extracted_text: String },
    #[error(transparent)]
    Analysis(#[from] AnalysisError),
    #[error("could not store upload: {0}")]
    Io(#[from] io::Error),
    #[error("text extraction task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// A file written to the upload directory.
#[derive(Debug, Clone)]
pub struct StoredUpload {
    pub stored_name: String,
    pub path: PathBuf,
}

pub struct AppContext {
    pub config: AppConfig,
    pub extractor: DocumentExtractor,
    pub analyst: BillAnalyst,
    pub retriever: Retriever,
    pub chatbot: Chatbot,
    pub sessions: Arc<dyn SessionStore>,
    pub knowledge: KnowledgeBase,
}

impl AppContext {
    /// Export the catalog, build retrieval and open the session store.
    pub async fn initialize(config: AppConfig) -> anyhow::Result<Self> {
        let builtin = KnowledgeBase::builtin()?;
        builtin
            .export(&config.data_dir)
            .with_context(|| format!("exporting catalog to {}", config.data_dir.display()))?;
        let knowledge = KnowledgeBase::load(&config.data_dir)?;

        let retriever = Retriever::build(
            knowledge.documents(),
            &config.embedding,
            config.retrieval.clone(),
        )
        .await;

        if config.llm.api_key.is_empty() && config.llm.provider != ProviderKind::Ollama {
            warn!(provider = config.llm.provider.as_str(), "no model API key configured");
        }
        let model = Arc::new(ModelClient::new(&config.llm).context("building model client")?);

        let policy = EvictionPolicy {
            ttl: config.sessions.ttl,
            max_entries: config.sessions.max_entries,
        };
        let sessions: Arc<dyn SessionStore> = match &config.sessions.db_path {
            Some(path) => Arc::new(
                SqliteSessionStore::open(path, policy)
                    .with_context(|| format!("opening session database {}", path.display()))?,
            ),
            None => Arc::new(MemorySessionStore::new(policy)),
        };

        info!(
            model = model.model(),
            documents = retriever.documents().len(),
            embeddings = retriever.has_embeddings(),
            "application context ready"
        );

        Ok(Self {
            extractor: DocumentExtractor::new(config.ocr.clone()),
            analyst: BillAnalyst::new(model, config.analysis_min_chars),
            retriever,
            chatbot: Chatbot::new(sessions.clone()),
            sessions,
            knowledge,
            config,
        })
    }

    /// Save uploaded bytes as `{uuid}_{sanitized name}`.
    pub async fn store_upload(&self, file_name: &str, bytes: &[u8]) -> Result<StoredUpload, UploadError> {
        if !is_allowed_file(file_name) {
            warn!(file_name, "rejected upload with disallowed extension");
            return Err(UploadError::UnsupportedType);
        }
        let stored_name = format!("{}_{}", uuid::Uuid::new_v4(), secure_filename(file_name));
        let dir = &self.config.upload_dir;
        tokio::fs::create_dir_all(dir).await?;
        let path = dir.join(&stored_name);
        tokio::fs::write(&path, bytes).await?;
        info!(path = %path.display(), "upload saved");
        Ok(StoredUpload { stored_name, path })
    }

    /// OCR on the blocking pool.
    pub async fn extract_text(&self, path: &Path) -> Result<String, UploadError> {
        let extractor = self.extractor.clone();
        let path = path.to_path_buf();
        Ok(tokio::task::spawn_blocking(move || extractor.extract(&path)).await?)
    }

    pub async fn analyze_document(&self, path: &Path) -> Result<BillAnalysis, UploadError> {
        let text = self.extract_text(path).await?;
        if !has_sufficient_text(&text, self.config.analysis_min_chars) {
            warn!(path = %path.display(), "insufficient text extracted");
            return Err(UploadError::InsufficientText {
                extracted_text: text,
            });
        }
        info!(path = %path.display(), "analyzing bill");
        Ok(self.analyst.analyze(&text).await?)
    }

    /// Run a chatbot turn on the blocking pool, where session-store I/O
    /// cannot stall the async workers.
    pub async fn with_chatbot<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Chatbot) -> Result<T, StoreError> + Send + 'static,
    {
        let chatbot = self.chatbot.clone();
        tokio::task::spawn_blocking(move || f(&chatbot)).await?
    }

    /// Direct session-store access on the blocking pool.
    pub async fn with_sessions<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn SessionStore) -> Result<T, StoreError> + Send + 'static,
    {
        let sessions = self.sessions.clone();
        tokio::task::spawn_blocking(move || f(sessions.as_ref())).await?
    }

    /// Analysis for `user_id`'s conversation, if one was uploaded.
    pub async fn stored_analysis(&self, user_id: Option<&str>) -> Result<Option<BillAnalysis>, StoreError> {
        let Some(id) = user_id.map(str::to_string) else {
            return Ok(None);
        };
        self.with_sessions(move |store| Ok(store.get(&id)?.and_then(|s| s.bill_analysis)))
            .await
    }

    /// Free-form assistant answer using an explicit analysis or the one
    /// stored on the conversation.
    pub async fn assistant_reply(
        &self,
        message: &str,
        user_id: Option<&str>,
        analysis: Option<BillAnalysis>,
    ) -> Result<ChatReply, StoreError> {
        let analysis = match analysis {
            Some(a) => Some(a),
            None => self.stored_analysis(user_id).await?,
        };
        let response = self.analyst.chat(message, analysis.as_ref()).await;
        Ok(ChatReply {
            response,
            has_bill_analysis: analysis.is_some(),
        })
    }

    pub async fn ask_knowledge(&self, question: &str, user_id: Option<&str>) -> Result<String, StoreError> {
        let analysis = self.stored_analysis(user_id).await?;
        Ok(self
            .retriever
            .answer_question(self.analyst.model(), question, analysis.as_ref())
            .await)
    }
}

/// ASCII-only file name safe to join onto the upload directory.
pub fn secure_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let cleaned: String = base
        .chars()
        .map(|c| if c.is_whitespace() { '_' } else { c })
        .filter(|c| c.is_ascii_alphanumeric() || matches!(*c, '.' | '_' | '-'))
        .collect();
    let cleaned = cleaned.trim_start_matches(['.', '_']);
    if cleaned.is_empty() {
        "upload".to_string()
    } else {
        cleaned.to_string()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::config::{EmbeddingSettings, LlmSettings, RetrievalSettings, SessionSettings};
    use crate::doc_processor::OcrConfig;
    use std::time::Duration;

    /// Config whose external services are all unreachable.
    pub fn offline_config(root: &Path) -> AppConfig {
        AppConfig {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            upload_dir: root.join("uploads"),
            max_upload_bytes: 1024 * 1024,
            data_dir: root.join("data"),
            analysis_min_chars: 50,
            llm: LlmSettings {
                provider: ProviderKind::Claude,
                api_key: "test".into(),
                base_url: "http://127.0.0.1:9".into(),
                model: "claude-test".into(),
                temperature: None,
                connect_timeout: Duration::from_millis(200),
                read_timeout: Duration::from_millis(500),
                max_attempts: 1,
            },
            embedding: EmbeddingSettings {
                api_key: String::new(),
                base_url: "http://127.0.0.1:9".into(),
                model: "text-embedding-3-small".into(),
                connect_timeout: Duration::from_millis(200),
                read_timeout: Duration::from_millis(500),
                max_attempts: 1,
            },
            retrieval: RetrievalSettings {
                similarity_threshold: 0.5,
                top_k: 3,
            },
            sessions: SessionSettings {
                db_path: None,
                ttl: Duration::from_secs(60),
                max_entries: 100,
            },
            ocr: OcrConfig {
                tesseract_path: root.join("missing-tesseract").display().to_string(),
                pdftoppm_path: root.join("missing-pdftoppm").display().to_string(),
                ..OcrConfig::default()
            },
        }
    }

    pub async fn offline_context(root: &Path) -> AppContext {
        AppContext::initialize(offline_config(root)).await.unwrap()
    }
}
