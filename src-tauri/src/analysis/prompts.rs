use serde_json::Value;

pub const ANALYSIS_MAX_TOKENS: u32 = 4096;
pub const COMPARISON_MAX_TOKENS: u32 = 4096;
pub const CHAT_MAX_TOKENS: u32 = 2048;

pub fn analysis_prompt(bill_text: &str) -> String {
    format!(
        r#"Sei un assistente specializzato nell'analisi delle bollette elettriche spagnole. Analizza attentamente la seguente bolletta elettrica ed estrai SOLO i dati reali presenti nel testo. Non inventare o simulare dati non presenti.

1. Estrai i dati principali (periodo di fatturazione, importo totale, consumi in kWh)
2. Identifica le voci di costo specifiche presenti nella bolletta
3. Identifica eventuali anomalie o incongruenze nei consumi o nei costi
4. Fornisci consigli pratici basati ESCLUSIVAMENTE sui dati reali estratti

Se alcuni dati non sono presenti o non possono essere estratti con certezza, indica chiaramente "Dato non disponibile" invece di inventare informazioni.

Ecco il testo della bolletta:
{bill_text}

Rispondi in formato JSON con i seguenti campi:
- summary: riepilogo dei dati principali effettivamente trovati
- cost_breakdown: spiegazione delle voci di costo identificate nel testo
- saving_tips: consigli per risparmiare basati sui dati reali
- anomalies: eventuali anomalie rilevate nei dati
- raw_data: dati strutturati estratti (periodo, importo, consumi, etc.)
"#
    )
}

pub fn comparison_prompt(current: &Value, previous: &Value) -> String {
    format!(
        r#"Sei un assistente specializzato nell'analisi delle bollette elettriche spagnole. Confronta la bolletta corrente con quella precedente e identifica SOLO differenze reali basate sui dati forniti. Non inventare o simulare dati non presenti.

1. Identifica differenze nei consumi (kWh) se presenti in entrambe le bollette
2. Identifica differenze nei costi se presenti in entrambe le bollette
3. Identifica possibili errori o anomalie basati ESCLUSIVAMENTE sui dati forniti
4. Suggerisci motivi plausibili per eventuali aumenti o diminuzioni
5. Fornisci suggerimenti per contestare eventuali errori al call center SOLO se ci sono anomalie evidenti

Se alcuni dati non sono presenti o non possono essere confrontati con certezza, indica chiaramente "Confronto non disponibile" invece di inventare informazioni.

Bolletta corrente:
{current}

Bolletta precedente:
{previous}

Rispondi in formato JSON con i seguenti campi:
- consumption_diff: differenza nei consumi con percentuale (solo se i dati sono disponibili)
- cost_diff: differenza nei costi con percentuale (solo se i dati sono disponibili)
- anomalies: eventuali anomalie o errori rilevati (solo se evidenti dai dati)
- explanation: possibili spiegazioni per le differenze (basate sui dati reali)
- complaint_tips: suggerimenti per contestare eventuali errori (solo se necessario)
"#,
        current = pretty(current),
        previous = pretty(previous),
    )
}

pub fn chat_prompt(user_input: &str, analysis: Option<&Value>) -> String {
    let context = analysis
        .map(|a| format!("Analisi della bolletta: {}\n\n", pretty(a)))
        .unwrap_or_default();
    format!(
        r#"{context}
Sei un assistente specializzato nell'aiutare i clienti a comprendere le loro bollette elettriche e a risparmiare energia.
Rispondi alla seguente domanda del cliente in modo chiaro, conciso e utile.
Basa le tue risposte ESCLUSIVAMENTE sui dati reali presenti nell'analisi della bolletta.
Se l'informazione richiesta non è disponibile nei dati, indica chiaramente che non puoi rispondere a quella domanda specifica.

Domanda del cliente: {user_input}
"#
    )
}

/// Retrieval-augmented question prompt; `snippets` are knowledge-base texts.
pub fn knowledge_prompt(question: &str, snippets: &[String], analysis: Option<&Value>) -> String {
    let mut prompt = String::from(
        "Sei EnergyBot, l'assistente virtuale di EnergyWise, un fornitore di energia elettrica e gas in Italia.\n\
         Rispondi in modo chiaro, conciso e utile, basandoti SOLO sulle informazioni seguenti.\n\
         Se non hai informazioni sufficienti, chiedi gentilmente al cliente di fornire più dettagli.\n\
         Se la domanda riguarda la bolletta e non hai informazioni sufficienti, chiedi gentilmente al cliente di caricare la bolletta.\n\n",
    );

    if snippets.is_empty() {
        prompt.push_str("Nessun documento rilevante trovato nella knowledge base.\n\n");
    } else {
        prompt.push_str("Informazioni dalla knowledge base:\n");
        for (i, snippet) in snippets.iter().enumerate() {
            prompt.push_str(&format!("[{}] {}\n", i + 1, snippet.trim()));
        }
        prompt.push('\n');
    }

    if let Some(analysis) = analysis {
        prompt.push_str(&format!(
            "Il cliente ha caricato una bolletta. Ecco l'analisi:\n{}\n\n",
            pretty(analysis)
        ));
    }

    prompt.push_str(&format!("Domanda del cliente: {}\n", question));
    prompt
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_analysis_prompt_embeds_text() {
        let prompt = analysis_prompt("IMPORTE TOTAL 84,20 €");
        assert!(prompt.contains("IMPORTE TOTAL 84,20 €"));
        assert!(prompt.contains("raw_data"));
    }

    #[test]
    fn test_chat_prompt_context_only_with_analysis() {
        let without = chat_prompt("Perché pago di più?", None);
        assert!(!without.contains("Analisi della bolletta"));

        let with = chat_prompt("Perché pago di più?", Some(&json!({"summary": "84 €"})));
        assert!(with.starts_with("Analisi della bolletta: {"));
        assert!(with.contains("Domanda del cliente: Perché pago di più?"));
    }

    #[test]
    fn test_knowledge_prompt_numbers_snippets() {
        let prompt = knowledge_prompt(
            "Quanto costa?",
            &["Prodotto: Casa Basic".into(), "Offerta: Estate".into()],
            None,
        );
        assert!(prompt.contains("[1] Prodotto: Casa Basic"));
        assert!(prompt.contains("[2] Offerta: Estate"));
    }
}
