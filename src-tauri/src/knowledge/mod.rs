//! Built-in EnergyWise product catalog.
//!
//! The catalog ships inside the binary and is exported to flat JSON files at
//! startup; the retrieval layer reads those files back.

pub mod documents;

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::info;

pub use documents::{DocumentKind, KnowledgeDocument};

const BUILTIN_CATALOG: &str = include_str!("../../data/catalog.json");

const PRODUCTS_FILE: &str = "products.json";
const OFFERS_FILE: &str = "offers.json";
const FAQ_FILE: &str = "faq.json";
const COMPANY_FILE: &str = "company_info.json";

#[derive(Debug, thiserror::Error)]
pub enum KnowledgeError {
    #[error("knowledge file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("knowledge file {path} is malformed: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("built-in catalog is malformed: {0}")]
    Builtin(#[source] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Faq {
    pub question: String,
    pub answer: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub description: String,
    #[serde(default)]
    pub features: Vec<String>,
    /// Either flat `component -> price` pairs or, for dual-fuel plans,
    /// nested `electricity` / `gas` blocks.
    #[serde(default)]
    pub price: Map<String, Value>,
    #[serde(default)]
    pub target: String,
    #[serde(default)]
    pub requirements: String,
    #[serde(default)]
    pub faq: Vec<Faq>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Offer {
    pub id: String,
    pub name: String,
    pub description: String,
    /// `YYYY-MM-DD` or `ongoing`.
    pub valid_until: String,
    #[serde(default)]
    pub applicable_products: Vec<String>,
    #[serde(default)]
    pub terms: String,
}

impl Offer {
    pub fn is_active_on(&self, today: NaiveDate) -> bool {
        if self.valid_until == "ongoing" {
            return true;
        }
        NaiveDate::parse_from_str(&self.valid_until, "%Y-%m-%d")
            .map(|until| until >= today)
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    pub customer_service: String,
    pub email: String,
    pub website: String,
    #[serde(default)]
    pub social_media: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompanyInfo {
    pub name: String,
    pub founded: u16,
    pub headquarters: String,
    pub mission: String,
    #[serde(default)]
    pub values: Vec<String>,
    #[serde(default)]
    pub certifications: Vec<String>,
    pub contact: Contact,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeBase {
    pub products: Vec<Product>,
    pub offers: Vec<Offer>,
    pub faq: Vec<Faq>,
    pub company_info: Option<CompanyInfo>,
}

#[derive(Debug, Default, Serialize)]
pub struct SearchResults<'a> {
    pub products: Vec<&'a Product>,
    pub offers: Vec<&'a Offer>,
    pub faq: Vec<&'a Faq>,
}

impl KnowledgeBase {
    pub fn builtin() -> Result<Self, KnowledgeError> {
        serde_json::from_str(BUILTIN_CATALOG).map_err(KnowledgeError::Builtin)
    }

    /// Write one JSON file per section into `dir`, creating it if needed.
    pub fn export(&self, dir: &Path) -> Result<(), KnowledgeError> {
        fs::create_dir_all(dir).map_err(|source| KnowledgeError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        write_json(&dir.join(PRODUCTS_FILE), &self.products)?;
        write_json(&dir.join(OFFERS_FILE), &self.offers)?;
        write_json(&dir.join(FAQ_FILE), &self.faq)?;
        match &self.company_info {
            Some(info) => write_json(&dir.join(COMPANY_FILE), info)?,
            None => write_json(&dir.join(COMPANY_FILE), &Map::new())?,
        }
        info!(dir = %dir.display(), "knowledge base exported");
        Ok(())
    }

    /// Read the files written by [`export`](Self::export). A missing file
    /// leaves its section empty.
    pub fn load(dir: &Path) -> Result<Self, KnowledgeError> {
        let company_info = read_json::<Value>(&dir.join(COMPANY_FILE))?
            .filter(|v| v.as_object().map(|m| !m.is_empty()).unwrap_or(false))
            .map(|v| {
                serde_json::from_value(v).map_err(|source| KnowledgeError::Json {
                    path: dir.join(COMPANY_FILE),
                    source,
                })
            })
            .transpose()?;

        Ok(Self {
            products: read_json(&dir.join(PRODUCTS_FILE))?.unwrap_or_default(),
            offers: read_json(&dir.join(OFFERS_FILE))?.unwrap_or_default(),
            faq: read_json(&dir.join(FAQ_FILE))?.unwrap_or_default(),
            company_info,
        })
    }

    pub fn product(&self, id: &str) -> Option<&Product> {
        self.products.iter().find(|p| p.id == id)
    }

    pub fn products_by_type(&self, kind: &str) -> Vec<&Product> {
        self.products.iter().filter(|p| p.kind == kind).collect()
    }

    pub fn active_offers(&self, today: NaiveDate) -> Vec<&Offer> {
        self.offers.iter().filter(|o| o.is_active_on(today)).collect()
    }

    /// Case-insensitive substring search.
    pub fn search(&self, query: &str) -> SearchResults<'_> {
        let query = query.to_lowercase();
        let hit = |text: &str| text.to_lowercase().contains(&query);

        SearchResults {
            products: self
                .products
                .iter()
                .filter(|p| hit(&p.name) || hit(&p.description) || p.features.iter().any(|f| hit(f)))
                .collect(),
            offers: self
                .offers
                .iter()
                .filter(|o| hit(&o.name) || hit(&o.description))
                .collect(),
            faq: self
                .faq
                .iter()
                .filter(|f| hit(&f.question) || hit(&f.answer))
                .collect(),
        }
    }

    /// One retrievable document per product, offer, FAQ and company record.
    pub fn documents(&self) -> Vec<KnowledgeDocument> {
        let mut docs = Vec::new();
        docs.extend(self.products.iter().map(KnowledgeDocument::from_product));
        docs.extend(self.offers.iter().map(KnowledgeDocument::from_offer));
        docs.extend(
            self.faq
                .iter()
                .enumerate()
                .map(|(i, faq)| KnowledgeDocument::from_faq(i, faq)),
        );
        if let Some(info) = &self.company_info {
            docs.push(KnowledgeDocument::from_company(info));
        }
        docs
    }
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), KnowledgeError> {
    let text = serde_json::to_string_pretty(value).map_err(|source| KnowledgeError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    fs::write(path, text).map_err(|source| KnowledgeError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, KnowledgeError> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(KnowledgeError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    serde_json::from_str(&text)
        .map(Some)
        .map_err(|source| KnowledgeError::Json {
            path: path.to_path_buf(),
            source,
        })
}
