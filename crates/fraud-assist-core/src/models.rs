//! Core data models shared by the indexing, retrieval, grounding, and
//! composition stages.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Closed set of source document kinds accepted by ingestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    /// Page-based: one section per page.
    Pdf,
    /// Header-based: one section per heading.
    Markdown,
}

impl DocumentKind {
    /// Resolve a kind from a file extension (case-insensitive, no dot).
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "pdf" => Some(DocumentKind::Pdf),
            "md" | "markdown" => Some(DocumentKind::Markdown),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentKind::Pdf => "pdf",
            DocumentKind::Markdown => "markdown",
        }
    }
}

/// A page or a header section of a source document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    /// `"page 3"` for PDF pages, the heading text for Markdown.
    pub label: String,
    pub text: String,
}

impl Section {
    pub fn new(label: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            text: text.into(),
        }
    }
}

/// A source file after extraction, before chunking.
#[derive(Debug, Clone)]
pub struct Document {
    /// Stable id: the path under the docs directory, without extension.
    pub doc_id: String,
    pub title: String,
    pub source_path: String,
    pub kind: DocumentKind,
    /// Ordered page or section markers with their text.
    pub sections: Vec<Section>,
}

impl Document {
    /// Build a document whose id and title derive from the file stem.
    ///
    /// `opposition_carte-bancaire` → id `opposition_carte-bancaire`,
    /// title `opposition carte bancaire`.
    pub fn from_stem(
        stem: &str,
        source_path: impl Into<String>,
        kind: DocumentKind,
        sections: Vec<Section>,
    ) -> Self {
        Self {
            doc_id: stem.to_string(),
            title: stem.replace(['_', '-'], " "),
            source_path: source_path.into(),
            kind,
            sections,
        }
    }
}

/// Provenance kept by the chunk store for each indexed document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentMeta {
    pub doc_id: String,
    pub title: String,
    pub source_path: String,
    pub kind: DocumentKind,
}

/// The atomic retrievable unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Chunk {
    /// Content-derived id, stable across reindexes of identical content.
    pub chunk_id: String,
    pub doc_id: String,
    /// Position of the chunk within its document, starting at 0.
    pub ordinal: usize,
    pub text: String,
    pub page_or_section: String,
    pub token_count: usize,
}

/// One fused hit of a hybrid query. Lives for the duration of one query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievalResult {
    pub chunk_id: String,
    /// Cosine similarity in `[0, 1]`; `None` when the semantic side missed.
    pub semantic_score: Option<f64>,
    /// Raw BM25 score; `None` when the lexical side missed.
    pub bm25_score: Option<f64>,
    pub fused_score: f64,
}

/// Auditable pointer from an answer back to the chunk supporting it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    pub chunk_id: String,
    pub doc_id: String,
    pub title: String,
    pub page_or_section: String,
    pub excerpt: String,
    /// Fused score rounded for display.
    pub score: f64,
    pub source_path: String,
}

/// Severity attached to a risk flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// Structural risk signals attached to a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskFlag {
    /// Wire transfer: funds cannot be pulled back by the bank alone.
    IrrevocableTransfer,
    /// Card payment: chargeback and contestation are available.
    ReversibleCardPayment,
    DirectDebit,
    ChequePayment,
    HighAmount,
    HighRiskChannel,
    ForeignTransaction,
    /// The user message matched injection or social-engineering patterns.
    UntrustedInput,
    /// The user pasted card numbers, CVV, or similar secrets.
    SensitiveDataShared,
    /// Generated content without support in the cited chunks was removed.
    UngroundedClaimRemoved,
    TechnicalIssue,
}

impl RiskFlag {
    pub fn name(&self) -> &'static str {
        match self {
            RiskFlag::IrrevocableTransfer => "irrevocable_transfer",
            RiskFlag::ReversibleCardPayment => "reversible_card_payment",
            RiskFlag::DirectDebit => "direct_debit",
            RiskFlag::ChequePayment => "cheque_payment",
            RiskFlag::HighAmount => "high_amount",
            RiskFlag::HighRiskChannel => "high_risk_channel",
            RiskFlag::ForeignTransaction => "foreign_transaction",
            RiskFlag::UntrustedInput => "untrusted_input",
            RiskFlag::SensitiveDataShared => "sensitive_data_shared",
            RiskFlag::UngroundedClaimRemoved => "ungrounded_claim_removed",
            RiskFlag::TechnicalIssue => "technical_issue",
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            RiskFlag::IrrevocableTransfer | RiskFlag::SensitiveDataShared => Severity::Critical,
            RiskFlag::HighAmount | RiskFlag::HighRiskChannel | RiskFlag::UntrustedInput => {
                Severity::High
            }
            RiskFlag::DirectDebit
            | RiskFlag::ChequePayment
            | RiskFlag::ForeignTransaction
            | RiskFlag::UngroundedClaimRemoved => Severity::Medium,
            RiskFlag::ReversibleCardPayment | RiskFlag::TechnicalIssue => Severity::Low,
        }
    }
}

impl fmt::Display for RiskFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Payment channel of the disputed transaction.
///
/// Unknown values fold to [`Channel::Autre`] instead of failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", from = "String")]
pub enum Channel {
    Online,
    Terminal,
    Virement,
    Prelevement,
    Cheque,
    Autre,
}

impl Channel {
    pub fn parse(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "online" => Channel::Online,
            "terminal" => Channel::Terminal,
            "virement" => Channel::Virement,
            "prelevement" | "prélèvement" => Channel::Prelevement,
            "cheque" | "chèque" => Channel::Cheque,
            _ => Channel::Autre,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Online => "online",
            Channel::Terminal => "terminal",
            Channel::Virement => "virement",
            Channel::Prelevement => "prelevement",
            Channel::Cheque => "cheque",
            Channel::Autre => "autre",
        }
    }
}

impl From<String> for Channel {
    fn from(value: String) -> Self {
        Channel::parse(&value)
    }
}

/// Caller-supplied description of the transaction under dispute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionContext {
    pub channel: Channel,
    #[serde(default)]
    pub amount: Option<f64>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub merchant: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub last_four_digits: Option<String>,
}

impl TransactionContext {
    pub fn new(channel: Channel) -> Self {
        Self {
            channel,
            amount: None,
            currency: None,
            merchant: None,
            date: None,
            country: None,
            last_four_digits: None,
        }
    }

    /// Reject values the engine must never carry further.
    pub fn validate(&self) -> Result<(), String> {
        if let Some(amount) = self.amount {
            if !amount.is_finite() || amount < 0.0 {
                return Err("amount must be a non-negative number".to_string());
            }
        }
        if let Some(ref digits) = self.last_four_digits {
            if digits.len() != 4 || !digits.chars().all(|c| c.is_ascii_digit()) {
                return Err("last_four_digits must be exactly 4 digits".to_string());
            }
        }
        if let Some(ref currency) = self.currency {
            if currency.len() != 3 {
                return Err("currency must be a 3-letter code".to_string());
            }
        }
        Ok(())
    }
}

/// A previous turn of the conversation, supplied by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationMessage {
    /// `"user"` or `"assistant"`.
    pub role: String,
    pub content: String,
}

/// Everything the composer needs to answer one request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryContext {
    pub message: String,
    #[serde(default)]
    pub transaction: Option<TransactionContext>,
    /// `Some(false)` means the customer has not confirmed the fraud yet.
    #[serde(default)]
    pub fraud_confirmed: Option<bool>,
    #[serde(default)]
    pub history: Vec<ConversationMessage>,
    #[serde(default)]
    pub session_id: Option<String>,
}

impl QueryContext {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn with_transaction(mut self, transaction: TransactionContext) -> Self {
        self.transaction = Some(transaction);
        self
    }

    pub fn with_fraud_confirmed(mut self, confirmed: bool) -> Self {
        self.fraud_confirmed = Some(confirmed);
        self
    }

    pub fn channel(&self) -> Option<Channel> {
        self.transaction.as_ref().map(|t| t.channel)
    }
}

/// Structured answer returned to the API layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentResponse {
    pub customer_message: String,
    pub actions: Vec<String>,
    pub citations: Vec<Citation>,
    pub missing_info_questions: Vec<String>,
    pub risk_flags: BTreeSet<RiskFlag>,
    pub info_not_found: bool,
}

impl AgentResponse {
    /// A response that asserts nothing: no citations, no actions.
    pub fn without_evidence(
        customer_message: impl Into<String>,
        missing_info_questions: Vec<String>,
        risk_flags: BTreeSet<RiskFlag>,
    ) -> Self {
        Self {
            customer_message: customer_message.into(),
            actions: Vec::new(),
            citations: Vec::new(),
            missing_info_questions,
            risk_flags,
            info_not_found: true,
        }
    }

    /// Highest severity among the risk flags.
    pub fn max_severity(&self) -> Option<Severity> {
        self.risk_flags.iter().map(|f| f.severity()).max()
    }

    /// `info_not_found` implies no citations and no actions.
    pub fn is_well_formed(&self) -> bool {
        !self.info_not_found || (self.citations.is_empty() && self.actions.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_from_extension() {
        assert_eq!(DocumentKind::from_extension("PDF"), Some(DocumentKind::Pdf));
        assert_eq!(
            DocumentKind::from_extension("markdown"),
            Some(DocumentKind::Markdown)
        );
        assert_eq!(DocumentKind::from_extension("docx"), None);
    }

    #[test]
    fn test_document_from_stem() {
        let doc = Document::from_stem(
            "rappel_virement-frauduleux",
            "/docs/rappel_virement-frauduleux.md",
            DocumentKind::Markdown,
            vec![],
        );
        assert_eq!(doc.doc_id, "rappel_virement-frauduleux");
        assert_eq!(doc.title, "rappel virement frauduleux");
    }

    #[test]
    fn test_channel_unknown_folds_to_autre() {
        let tx: TransactionContext = serde_json::from_str(r#"{"channel": "Bitcoin"}"#).unwrap();
        assert_eq!(tx.channel, Channel::Autre);
        let tx: TransactionContext = serde_json::from_str(r#"{"channel": " VIREMENT "}"#).unwrap();
        assert_eq!(tx.channel, Channel::Virement);
    }

    #[test]
    fn test_transaction_validation() {
        let mut tx = TransactionContext::new(Channel::Online);
        assert!(tx.validate().is_ok());
        tx.last_four_digits = Some("12a4".into());
        assert!(tx.validate().is_err());
        tx.last_four_digits = Some("1234".into());
        tx.amount = Some(-3.0);
        assert!(tx.validate().is_err());
    }

    #[test]
    fn test_risk_flag_serializes_snake_case() {
        let json = serde_json::to_string(&RiskFlag::IrrevocableTransfer).unwrap();
        assert_eq!(json, "\"irrevocable_transfer\"");
        assert_eq!(RiskFlag::UngroundedClaimRemoved.name(), "ungrounded_claim_removed");
    }

    #[test]
    fn test_max_severity() {
        let mut flags = BTreeSet::new();
        let r = AgentResponse::without_evidence("x", Vec::new(), flags.clone());
        assert_eq!(r.max_severity(), None);

        flags.insert(RiskFlag::ReversibleCardPayment);
        flags.insert(RiskFlag::HighAmount);
        let r = AgentResponse::without_evidence("x", Vec::new(), flags.clone());
        assert_eq!(r.max_severity(), Some(Severity::High));

        flags.insert(RiskFlag::IrrevocableTransfer);
        let r = AgentResponse::without_evidence("x", Vec::new(), flags);
        assert_eq!(r.max_severity(), Some(Severity::Critical));
    }

    #[test]
    fn test_without_evidence_is_well_formed() {
        let resp = AgentResponse::without_evidence("rien", vec![], BTreeSet::new());
        assert!(resp.info_not_found);
        assert!(resp.is_well_formed());
    }
}
