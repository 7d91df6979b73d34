use std::fmt::Write as _;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{CompanyInfo, Faq, Offer, Product};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    Products,
    Offers,
    Faq,
    CompanyInfo,
}

/// A catalog record flattened into the text that gets embedded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeDocument {
    #[serde(rename = "type")]
    pub kind: DocumentKind,
    pub id: String,
    pub text: String,
    pub data: Value,
}

impl KnowledgeDocument {
    pub fn from_product(product: &Product) -> Self {
        let mut text = format!(
            "Prodotto: {}\nTipo: {}\nDescrizione: {}\n\nCaratteristiche:\n",
            product.name, product.kind, product.description
        );
        push_list(&mut text, &product.features);
        text.push_str("\nPrezzo:\n");
        push_price(&mut text, product);
        let _ = write!(
            text,
            "\nTarget: {}\nRequisiti: {}\n\nFAQ:\n",
            product.target, product.requirements
        );
        for faq in &product.faq {
            let _ = writeln!(text, "Q: {}\nA: {}", faq.question, faq.answer);
        }

        Self::new(DocumentKind::Products, product.id.clone(), text, product)
    }

    pub fn from_offer(offer: &Offer) -> Self {
        let text = format!(
            "Offerta: {}\nDescrizione: {}\nValida fino: {}\nProdotti applicabili: {}\nTermini e condizioni: {}\n",
            offer.name,
            offer.description,
            offer.valid_until,
            offer.applicable_products.join(", "),
            offer.terms
        );
        Self::new(DocumentKind::Offers, offer.id.clone(), text, offer)
    }

    pub fn from_faq(index: usize, faq: &Faq) -> Self {
        let text = format!("Domanda: {}\nRisposta: {}\n", faq.question, faq.answer);
        Self::new(DocumentKind::Faq, format!("faq_{}", index), text, faq)
    }

    pub fn from_company(info: &CompanyInfo) -> Self {
        let mut text = format!(
            "Nome azienda: {}\nFondata: {}\nSede: {}\nMissione: {}\n\nValori:\n",
            info.name, info.founded, info.headquarters, info.mission
        );
        push_list(&mut text, &info.values);
        text.push_str("\nCertificazioni:\n");
        push_list(&mut text, &info.certifications);
        let _ = write!(
            text,
            "\nContatti:\n- Servizio clienti: {}\n- Email: {}\n- Sito web: {}\n",
            info.contact.customer_service, info.contact.email, info.contact.website
        );
        Self::new(DocumentKind::CompanyInfo, "company_info".to_string(), text, info)
    }

    fn new(kind: DocumentKind, id: String, text: String, data: &impl Serialize) -> Self {
        Self {
            kind,
            id,
            text,
            data: serde_json::to_value(data).unwrap_or(Value::Null),
        }
    }
}

fn push_list(text: &mut String, items: &[String]) {
    for item in items {
        let _ = writeln!(text, "- {}", item);
    }
}

fn push_price(text: &mut String, product: &Product) {
    let price = &product.price;
    if let (Some(electricity), Some(gas)) = (price.get("electricity"), price.get("gas")) {
        for (label, block) in [("Elettricità", electricity), ("Gas", gas)] {
            let _ = write!(
                text,
                "{}:\n- Componente fissa: {}\n- Componente variabile: {}\n\n",
                label,
                plain(block.get("fixed_component")),
                plain(block.get("variable_component")),
            );
        }
        let _ = writeln!(text, "Sconto dual: {}", plain(price.get("discount_dual")));
        return;
    }

    for (key, value) in price {
        let _ = writeln!(text, "- {}: {}", title_case(key), plain(Some(value)));
    }
}

fn plain(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// `discount_first_month` becomes `Discount First Month`.
fn title_case(key: &str) -> String {
    key.split('_')
        .filter(|w| !w.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::KnowledgeBase;

    fn kb() -> KnowledgeBase {
        KnowledgeBase::builtin().unwrap()
    }

    #[test]
    fn test_single_service_price_lines() {
        let doc = KnowledgeDocument::from_product(kb().product("basic-home").unwrap());
        assert_eq!(doc.kind, DocumentKind::Products);
        assert!(doc.text.starts_with("Prodotto: EnergyWise Casa Basic\nTipo: electricity\n"));
        assert!(doc.text.contains("- Fixed Component: 9,90€/mese\n"));
        assert!(doc.text.contains("- Discount First Month: 50%\n"));
        assert!(doc.text.contains("- Prezzo fisso per 12 mesi\n"));
        assert_eq!(doc.data["id"], "basic-home");
    }

    #[test]
    fn test_dual_fuel_price_blocks() {
        let doc = KnowledgeDocument::from_product(kb().product("dual-home").unwrap());
        assert!(doc.text.contains("Elettricità:\n- Componente fissa: 8,90€/mese\n"));
        assert!(doc.text.contains("Gas:\n- Componente fissa: 9,90€/mese\n- Componente variabile: 0,45€/Smc\n"));
        assert!(doc.text.contains("Sconto dual: 10% sul totale"));
    }

    #[test]
    fn test_offer_faq_company_text() {
        let kb = kb();
        let offer = KnowledgeDocument::from_offer(&kb.offers[0]);
        assert!(offer.text.contains("Valida fino: 2025-07-31"));
        assert_eq!(offer.id, "summer-promo-2025");

        let faq = KnowledgeDocument::from_faq(3, &kb.faq[3]);
        assert_eq!(faq.id, "faq_3");
        assert!(faq.text.starts_with("Domanda: Cosa devo fare in caso di guasto"));

        let company = KnowledgeDocument::from_company(kb.company_info.as_ref().unwrap());
        assert_eq!(company.id, "company_info");
        assert!(company.text.contains("- Servizio clienti: 800.123.456"));
    }

    #[test]
    fn test_title_case() {
        assert_eq!(title_case("payback_period"), "Payback Period");
        assert_eq!(title_case("starter_kit"), "Starter Kit");
    }
}
