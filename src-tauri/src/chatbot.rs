//! Keyword-driven customer chatbot.
//!
//! Messages are classified into an [`Intent`] by ordered keyword lists and
//! each intent is answered by a plain handler function.

use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use crate::analysis::BillAnalysis;
use crate::session::{ConversationState, Role, SessionStore, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    Greeting,
    Welcome,
    Pricing,
    Bill,
    Savings,
    Solar,
    Activation,
    Business,
    General,
}

const GREETING_WORDS: &[&str] = &["ciao", "salve", "buongiorno", "buonasera", "hey"];

/// Checked top to bottom; the first list with a hit wins.
const TOPIC_KEYWORDS: &[(Intent, &[&str])] = &[
    (Intent::Pricing, &["tariffa", "prezzo", "costo", "piano", "offerta"]),
    (Intent::Bill, &["bolletta", "fattura", "consumo", "analisi"]),
    (
        Intent::Savings,
        &["risparmio", "consiglio", "suggerimento", "ridurre", "ottimizzare"],
    ),
    (
        Intent::Solar,
        &["solare", "pannelli", "fotovoltaico", "rinnovabile"],
    ),
    (
        Intent::Activation,
        &["attivare", "contratto", "passaggio", "fornitore"],
    ),
    (
        Intent::Business,
        &["azienda", "impresa", "business", "professionale"],
    ),
];

type Handler = fn(&ConversationState) -> String;

const HANDLERS: &[(Intent, Handler)] = &[
    (Intent::Greeting, greeting_reply),
    (Intent::Welcome, welcome_reply),
    (Intent::Pricing, pricing_reply),
    (Intent::Bill, bill_reply),
    (Intent::Savings, savings_reply),
    (Intent::Solar, solar_reply),
    (Intent::Activation, activation_reply),
    (Intent::Business, business_reply),
    (Intent::General, general_reply),
];

const GREETING_REPLY: &str = "Ciao! Sono EnergyBot, l'assistente virtuale di EnergyWise. Come posso aiutarti oggi? Posso fornirti informazioni sui nostri prodotti e offerte, rispondere a domande sulla tua bolletta o darti consigli per risparmiare energia.";
const WELCOME_REPLY: &str = "Benvenuto! Sono EnergyBot, l'assistente virtuale di EnergyWise. Sono qui per aiutarti con informazioni sui nostri prodotti, analisi delle bollette e consigli per risparmiare energia. Come posso esserti utile oggi?";
const PRICING_REPLY: &str = "Offriamo diverse tariffe per soddisfare le tue esigenze. La nostra tariffa base 'EnergyWise Casa Basic' parte da 9,90€/mese con un costo di 0,12€/kWh. Abbiamo anche tariffe premium come 'EnergyWise Eco Plus' con energia 100% rinnovabile a 12,90€/mese. Per le aziende, offriamo il piano 'Business Flex' con tariffe personalizzabili. Posso fornirti maggiori dettagli su una tariffa specifica?";
const BILL_REPLY: &str = "Per analizzare la tua bolletta, puoi caricarla utilizzando l'icona di upload qui in chat. Ti fornirò un'analisi dettagliata e consigli personalizzati per risparmiare. Se hai domande specifiche sulla tua bolletta attuale, non esitare a chiedere.";
const SAVINGS_REPLY: &str = "Ecco alcuni consigli per risparmiare energia: utilizza elettrodomestici nelle fasce orarie più economiche (sera e weekend), regola il termostato a temperature ottimali (20°C in inverno, 26°C in estate), sostituisci le lampadine tradizionali con LED a basso consumo, e spegni completamente gli elettrodomestici invece di lasciarli in standby. Vuoi consigli più personalizzati?";
const SOLAR_REPLY: &str = "Il nostro piano 'EnergyWise Solar Home' offre una soluzione completa per l'installazione di pannelli solari domestici, con pannelli di ultima generazione, installazione e manutenzione incluse, e gestione delle pratiche per gli incentivi fiscali. Il pacchetto base parte da 6.900€ per un impianto da 3kW, con possibilità di finanziamento a partire da 99€ al mese. Attualmente è disponibile anche la promozione 'Solare 2025' che include una batteria di accumulo da 5kWh in omaggio per impianti di potenza minima 4kW.";
const ACTIVATION_REPLY: &str = "Puoi attivare una fornitura con EnergyWise online sul nostro sito, chiamando il numero verde 800.123.456 o visitando uno dei nostri punti vendita. Avrai bisogno del tuo codice fiscale, di un documento d'identità e dei dati della fornitura attuale (POD per l'elettricità e PDR per il gas). L'attivazione richiede generalmente da 2 a 4 settimane lavorative.";
const BUSINESS_REPLY: &str = "Per le aziende offriamo il piano 'EnergyWise Business Flex' con tariffe differenziate per fasce orarie, assistenza prioritaria 24/7, dashboard analitica avanzata e consulenza fiscale sugli incentivi energetici. La componente fissa è di 19,90€/mese, mentre quella variabile va da 0,10€/kWh a 0,16€/kWh in base alla fascia oraria. È possibile modificare il piano una volta ogni 6 mesi senza costi aggiuntivi.";
const GENERAL_REPLY: &str = "Grazie per la tua domanda. Come assistente virtuale di EnergyWise, posso aiutarti con informazioni sui nostri prodotti energetici, analisi delle bollette, consigli per risparmiare energia e molto altro. Puoi chiedermi dettagli specifici sui nostri piani tariffari, come attivare una fornitura, o come ottimizzare i tuoi consumi. In cosa posso esserti utile oggi?";

pub const UPLOAD_FAILED_REPLY: &str = "Mi dispiace, si è verificato un errore durante l'elaborazione della bolletta. Riprova più tardi o contatta il nostro servizio clienti al numero 800.123.456.";

fn greeting_reply(_: &ConversationState) -> String {
    GREETING_REPLY.to_string()
}

fn welcome_reply(_: &ConversationState) -> String {
    WELCOME_REPLY.to_string()
}

fn pricing_reply(_: &ConversationState) -> String {
    PRICING_REPLY.to_string()
}

fn savings_reply(_: &ConversationState) -> String {
    SAVINGS_REPLY.to_string()
}

fn solar_reply(_: &ConversationState) -> String {
    SOLAR_REPLY.to_string()
}

fn activation_reply(_: &ConversationState) -> String {
    ACTIVATION_REPLY.to_string()
}

fn business_reply(_: &ConversationState) -> String {
    BUSINESS_REPLY.to_string()
}

fn general_reply(_: &ConversationState) -> String {
    GENERAL_REPLY.to_string()
}

fn bill_reply(state: &ConversationState) -> String {
    match state.bill_analysis.as_ref().and_then(BillAnalysis::summary_text) {
        Some(summary) => format!(
            "Ho già analizzato la tua bolletta. In sintesi: {}\n\nChiedimi pure dettagli su costi, consumi o consigli per risparmiare.",
            summary
        ),
        None => BILL_REPLY.to_string(),
    }
}

pub fn classify(message: &str, first_message: bool) -> Intent {
    let lower = message.to_lowercase();
    let mentions = |words: &[&str]| words.iter().any(|w| lower.contains(w));

    if first_message {
        return if mentions(GREETING_WORDS) {
            Intent::Greeting
        } else {
            Intent::Welcome
        };
    }

    TOPIC_KEYWORDS
        .iter()
        .find(|(_, words)| mentions(words))
        .map(|(intent, _)| *intent)
        .unwrap_or(Intent::General)
}

fn respond(intent: Intent, state: &ConversationState) -> String {
    HANDLERS
        .iter()
        .find(|(i, _)| *i == intent)
        .map(|(_, handler)| handler(state))
        .unwrap_or_else(|| GENERAL_REPLY.to_string())
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatReply {
    pub response: String,
    pub has_bill_analysis: bool,
}

#[derive(Clone)]
pub struct Chatbot {
    sessions: Arc<dyn SessionStore>,
}

impl Chatbot {
    pub fn new(sessions: Arc<dyn SessionStore>) -> Self {
        Self { sessions }
    }

    pub fn process_message(&self, user_id: &str, message: &str) -> Result<ChatReply, StoreError> {
        let state = self.sessions.append_message(user_id, Role::User, message)?;
        let intent = classify(message, state.messages.len() == 1);
        info!(user_id, ?intent, "chatbot message");
        let response = respond(intent, &state);
        self.reply(user_id, response)
    }

    /// Record an analysed upload on the conversation and summarize it.
    pub fn attach_analysis(
        &self,
        user_id: &str,
        file_name: &str,
        analysis: BillAnalysis,
    ) -> Result<ChatReply, StoreError> {
        self.sessions.append_message(
            user_id,
            Role::User,
            &format!("Ho caricato la mia bolletta: {}", file_name),
        )?;
        let response = match analysis.summary_text() {
            Some(summary) => format!(
                "Ho analizzato la tua bolletta. Ecco un riepilogo: {}\n\nPuoi chiedermi spiegazioni sulle voci di costo o consigli per risparmiare.",
                summary
            ),
            None => "Ho analizzato la tua bolletta. Puoi chiedermi spiegazioni sulle voci di costo o consigli per risparmiare.".to_string(),
        };
        self.sessions.set_bill_analysis(user_id, analysis)?;
        self.reply(user_id, response)
    }

    /// Record an upload that could not be analysed.
    pub fn upload_failed(&self, user_id: &str, file_name: &str) -> Result<ChatReply, StoreError> {
        self.sessions.append_message(
            user_id,
            Role::User,
            &format!("Ho caricato la mia bolletta: {}", file_name),
        )?;
        self.reply(user_id, UPLOAD_FAILED_REPLY.to_string())
    }

    pub fn reset(&self, user_id: &str) -> Result<(), StoreError> {
        info!(user_id, "conversation reset");
        self.sessions.reset(user_id)
    }

    pub fn conversation(&self, user_id: &str) -> Result<Option<ConversationState>, StoreError> {
        self.sessions.get(user_id)
    }

    fn reply(&self, user_id: &str, response: String) -> Result<ChatReply, StoreError> {
        let state = self
            .sessions
            .append_message(user_id, Role::Assistant, &response)?;
        Ok(ChatReply {
            response,
            has_bill_analysis: state.bill_analysis.is_some(),
        })
    }
}
