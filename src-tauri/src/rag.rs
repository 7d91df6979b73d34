//! Vector retrieval over the knowledge catalog.

use std::sync::Arc;
use std::time::Duration;

use backon::Retryable;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use tracing::{error, info, warn};

use crate::analysis::{prompts, BillAnalysis};
use crate::config::{EmbeddingSettings, RetrievalSettings};
use crate::embedding::{generate_embeddings, search_similar};
use crate::knowledge::{DocumentKind, KnowledgeDocument};
use crate::llm::retry::RetryPolicy;
use crate::llm::{LlmError, ModelClient};

const EMBEDDING_BATCH: usize = 20;
const FALLBACK_SIMILARITY: f32 = 0.95;

pub const KNOWLEDGE_APOLOGY: &str = "Mi dispiace, si è verificato un errore durante l'elaborazione della tua domanda. Puoi riprovare più tardi o contattare il nostro servizio clienti al numero 800.123.456.";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievedDocument {
    #[serde(rename = "type")]
    pub kind: DocumentKind,
    pub id: String,
    pub text: String,
    pub similarity: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

struct CannedSnippet {
    triggers: &'static [&'static str],
    kind: DocumentKind,
    id: &'static str,
    text: &'static str,
}

const CANNED_SNIPPETS: &[CannedSnippet] = &[
    CannedSnippet {
        triggers: &["tariffa", "prezzo", "costo"],
        kind: DocumentKind::Products,
        id: "basic-home",
        text: "EnergyWise offre diverse tariffe, tra cui la tariffa base 'EnergyWise Casa Basic' a 9,90€/mese con un costo di 0,12€/kWh e la tariffa premium 'EnergyWise Eco Plus' con energia 100% rinnovabile a 12,90€/mese.",
    },
    CannedSnippet {
        triggers: &["eco", "verde", "rinnovabile"],
        kind: DocumentKind::Products,
        id: "eco-plus",
        text: "Il piano 'EnergyWise Eco Plus' offre energia certificata 100% da fonti rinnovabili, report mensile di efficienza energetica, consulenza energetica gratuita e un programma fedeltà con punti convertibili in sconti.",
    },
    CannedSnippet {
        triggers: &["business", "azienda", "impresa"],
        kind: DocumentKind::Products,
        id: "business-flex",
        text: "Il piano 'EnergyWise Business Flex' è pensato per piccole e medie imprese con tariffe differenziate per fasce orarie, assistenza prioritaria 24/7 e dashboard analitica avanzata.",
    },
    CannedSnippet {
        triggers: &["solare", "pannelli", "fotovoltaico"],
        kind: DocumentKind::Products,
        id: "solar-home",
        text: "La soluzione 'EnergyWise Solar Home' include pannelli solari di ultima generazione, installazione e manutenzione incluse, sistema di monitoraggio in tempo reale e gestione pratiche per incentivi fiscali.",
    },
    CannedSnippet {
        triggers: &["offerta", "promozione", "sconto"],
        kind: DocumentKind::Offers,
        id: "summer-promo-2025",
        text: "La 'Promozione Estate 2025' offre uno sconto del 30% per i primi 3 mesi attivando una fornitura entro il 31/07/2025.",
    },
];

const COMPANY_SNIPPET: &str = "EnergyWise è un fornitore di energia elettrica e gas fondato nel 2015 con sede a Milano. La nostra missione è fornire energia sostenibile e accessibile, aiutando i clienti a ottimizzare i consumi e ridurre l'impatto ambientale.";

/// Keyword-matched snippets used while no embeddings are available.
pub fn fallback_documents(query: &str) -> Vec<RetrievedDocument> {
    let query = query.to_lowercase();
    let (kind, id, text) = CANNED_SNIPPETS
        .iter()
        .find(|s| s.triggers.iter().any(|t| query.contains(t)))
        .map(|s| (s.kind, s.id, s.text))
        .unwrap_or((DocumentKind::CompanyInfo, "company_info", COMPANY_SNIPPET));

    vec![RetrievedDocument {
        kind,
        id: id.to_string(),
        text: text.to_string(),
        similarity: FALLBACK_SIMILARITY,
        data: None,
    }]
}

#[derive(Clone)]
struct Embedder {
    http: Client,
    settings: EmbeddingSettings,
    retry: RetryPolicy,
}

impl Embedder {
    fn new(settings: &EmbeddingSettings) -> Result<Self, LlmError> {
        let http = Client::builder()
            .connect_timeout(settings.connect_timeout)
            .timeout(settings.read_timeout)
            .build()?;
        Ok(Self {
            http,
            settings: settings.clone(),
            retry: RetryPolicy {
                max_attempts: settings.max_attempts,
                ..RetryPolicy::default()
            },
        })
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
        let (http, settings) = (&self.http, &self.settings);
        let call = || async move { generate_embeddings(http, settings, texts).await };
        call.retry(self.retry.backoff())
            .sleep(tokio::time::sleep)
            .when(LlmError::is_retryable)
            .notify(|err: &LlmError, delay: Duration| {
                warn!(error = %err, ?delay, "embedding call failed, retrying");
            })
            .await
    }
}

pub struct Retriever {
    documents: Vec<KnowledgeDocument>,
    embeddings: Vec<Vec<f32>>,
    embedder: Option<Embedder>,
    settings: RetrievalSettings,
}

impl Retriever {
    /// Embed every document. Any failure leaves the retriever on the
    /// keyword fallback rather than failing startup.
    pub async fn build(
        documents: Vec<KnowledgeDocument>,
        embedding: &EmbeddingSettings,
        settings: RetrievalSettings,
    ) -> Self {
        let embedder = if embedding.api_key.is_empty() {
            warn!("no embedding credentials configured, retrieval uses keyword fallback");
            None
        } else {
            match Embedder::new(embedding) {
                Ok(embedder) => Some(embedder),
                Err(e) => {
                    error!(error = %e, "embedding client setup failed, using keyword fallback");
                    None
                }
            }
        };

        let mut retriever = Self {
            documents,
            embeddings: Vec::new(),
            embedder,
            settings,
        };
        if let Some(embedder) = retriever.embedder.clone() {
            retriever.embeddings = embed_documents(&embedder, &retriever.documents).await;
        }
        retriever
    }

    /// Retriever without an embedding endpoint.
    pub fn offline(documents: Vec<KnowledgeDocument>, settings: RetrievalSettings) -> Self {
        Self {
            documents,
            embeddings: Vec::new(),
            embedder: None,
            settings,
        }
    }

    pub fn has_embeddings(&self) -> bool {
        !self.embeddings.is_empty()
    }

    pub fn documents(&self) -> &[KnowledgeDocument] {
        &self.documents
    }

    pub async fn retrieve(&self, query: &str, top_k: Option<usize>) -> Vec<RetrievedDocument> {
        let top_k = top_k.unwrap_or(self.settings.top_k);
        let embedder = match &self.embedder {
            Some(e) if self.has_embeddings() => e,
            _ => {
                warn!("no document embeddings available, using keyword fallback");
                return fallback_documents(query);
            }
        };

        let query_embedding = match embedder.embed(&[query.to_string()]).await {
            Ok(mut v) if v.len() == 1 => v.remove(0),
            Ok(_) => {
                error!("embedding endpoint returned no vector for the query");
                return Vec::new();
            }
            Err(e) => {
                error!(error = %e, "query embedding failed");
                return Vec::new();
            }
        };

        self.rank(&query_embedding, top_k)
    }

    fn rank(&self, query_embedding: &[f32], top_k: usize) -> Vec<RetrievedDocument> {
        search_similar(
            query_embedding,
            &self.embeddings,
            top_k,
            self.settings.similarity_threshold,
        )
        .into_iter()
        .filter_map(|(i, similarity)| {
            self.documents.get(i).map(|doc| RetrievedDocument {
                kind: doc.kind,
                id: doc.id.clone(),
                text: doc.text.clone(),
                similarity,
                data: Some(doc.data.clone()),
            })
        })
        .collect()
    }

    /// Retrieval-augmented answer. Failures produce the customer-service
    /// apology instead of an error.
    pub async fn answer_question(
        &self,
        model: &Arc<ModelClient>,
        question: &str,
        analysis: Option<&BillAnalysis>,
    ) -> String {
        let docs = self.retrieve(question, None).await;
        info!(documents = docs.len(), "answering knowledge question");
        let snippets: Vec<String> = docs.into_iter().map(|d| d.text).collect();
        let context = analysis.map(BillAnalysis::to_value);
        let prompt = prompts::knowledge_prompt(question, &snippets, context.as_ref());

        match model.complete(&prompt, prompts::CHAT_MAX_TOKENS).await {
            Ok(reply) => reply,
            Err(e) => {
                error!(error = %e, "knowledge answer failed");
                KNOWLEDGE_APOLOGY.to_string()
            }
        }
    }
}

async fn embed_documents(embedder: &Embedder, documents: &[KnowledgeDocument]) -> Vec<Vec<f32>> {
    let mut embeddings = Vec::with_capacity(documents.len());
    for batch in documents.chunks(EMBEDDING_BATCH) {
        let texts: Vec<String> = batch.iter().map(|d| d.text.clone()).collect();
        match embedder.embed(&texts).await {
            Ok(vectors) if vectors.len() == batch.len() => embeddings.extend(vectors),
            Ok(vectors) => {
                error!(
                    expected = batch.len(),
                    got = vectors.len(),
                    "embedding count mismatch, using keyword fallback"
                );
                return Vec::new();
            }
            Err(e) => {
                error!(error = %e, "document embedding failed, using keyword fallback");
                return Vec::new();
            }
        }
    }
    info!(documents = embeddings.len(), "knowledge documents embedded");
    embeddings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::KnowledgeBase;

    fn settings() -> RetrievalSettings {
        RetrievalSettings {
            similarity_threshold: 0.5,
            top_k: 3,
        }
    }

    fn retriever_with(embeddings: Vec<Vec<f32>>) -> Retriever {
        let docs = KnowledgeBase::builtin().unwrap().documents();
        let mut retriever = Retriever::offline(docs, settings());
        retriever.embeddings = embeddings;
        retriever
    }

    #[test]
    fn test_fallback_keyword_table() {
        assert_eq!(fallback_documents("Quanto è il PREZZO?")[0].id, "basic-home");
        assert_eq!(fallback_documents("energia verde")[0].id, "eco-plus");
        assert_eq!(fallback_documents("sono un'azienda")[0].id, "business-flex");
        assert_eq!(fallback_documents("pannelli sul tetto")[0].id, "solar-home");
        assert_eq!(fallback_documents("c'è una promozione?")[0].id, "summer-promo-2025");

        let other = fallback_documents("chi siete?");
        assert_eq!(other.len(), 1);
        assert_eq!(other[0].kind, DocumentKind::CompanyInfo);
        assert_eq!(other[0].similarity, 0.95);
    }

    #[test]
    fn test_rank_descending_above_threshold() {
        let mut embeddings = vec![vec![0.0, 1.0]; 19];
        embeddings[4] = vec![1.0, 0.2];
        embeddings[7] = vec![1.0, 0.0];
        embeddings[12] = vec![1.0, 1.0];
        embeddings[15] = vec![1.0, 2.0];
        let retriever = retriever_with(embeddings);

        let ranked = retriever.rank(&[1.0, 0.0], 10);
        let ids: Vec<&str> = ranked.iter().map(|d| d.id.as_str()).collect();
        let docs = retriever.documents();
        assert_eq!(ids, vec![docs[7].id.as_str(), docs[4].id.as_str(), docs[12].id.as_str()]);
        assert!(ranked.iter().all(|d| d.similarity > 0.5));
        assert!(ranked[0].data.is_some());

        assert_eq!(retriever.rank(&[1.0, 0.0], 1).len(), 1);
    }

    #[tokio::test]
    async fn test_retrieve_without_embeddings_uses_fallback() {
        let retriever = retriever_with(Vec::new());
        assert!(!retriever.has_embeddings());
        let docs = retriever.retrieve("fotovoltaico", None).await;
        assert_eq!(docs[0].id, "solar-home");
    }

    fn embedding_at(base_url: String) -> EmbeddingSettings {
        EmbeddingSettings {
            api_key: "test".into(),
            base_url,
            model: "text-embedding-3-small".into(),
            connect_timeout: Duration::from_millis(200),
            read_timeout: Duration::from_millis(300),
            max_attempts: 1,
        }
    }

    #[tokio::test]
    async fn test_build_with_unreachable_endpoint_falls_back() {
        let docs = KnowledgeBase::builtin().unwrap().documents();
        let embedding = embedding_at("http://127.0.0.1:9".into());
        let retriever = Retriever::build(docs, &embedding, settings()).await;
        assert!(!retriever.has_embeddings());
        assert_eq!(retriever.retrieve("tariffa", None).await[0].id, "basic-home");
    }

    #[tokio::test]
    async fn test_build_with_stalled_endpoint_times_out() {
        let docs = KnowledgeBase::builtin().unwrap().documents();
        let embedding = embedding_at(crate::llm::test_server::stalled().await);

        let retriever = tokio::time::timeout(
            Duration::from_secs(5),
            Retriever::build(docs, &embedding, settings()),
        )
        .await
        .expect("build should give up on a silent endpoint");
        assert!(!retriever.has_embeddings());
    }

    #[tokio::test]
    async fn test_query_embedding_on_stalled_endpoint_times_out() {
        let embedding = embedding_at(crate::llm::test_server::stalled().await);
        let mut retriever = retriever_with(vec![vec![1.0, 0.0]; 19]);
        retriever.embedder = Some(Embedder::new(&embedding).unwrap());

        let docs = tokio::time::timeout(
            Duration::from_secs(5),
            retriever.retrieve("tariffa", None),
        )
        .await
        .expect("retrieve should give up on a silent endpoint");
        assert!(docs.is_empty());
    }
}
