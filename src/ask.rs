//! `fraudctl ask`: answer one message from the command line.

use anyhow::{bail, Result};

use fraud_assist_core::models::{AgentResponse, Channel, QueryContext, TransactionContext};

use crate::assistant::Assistant;

/// Transaction details given as CLI flags.
#[derive(Debug, Default, Clone)]
pub struct TransactionArgs {
    pub channel: Option<String>,
    pub amount: Option<f64>,
    pub currency: Option<String>,
    pub merchant: Option<String>,
    pub country: Option<String>,
    pub date: Option<String>,
}

impl TransactionArgs {
    /// `None` when no flag was given. A missing channel with other flags
    /// set becomes `autre`.
    pub fn into_transaction(self) -> Result<Option<TransactionContext>> {
        let any = self.channel.is_some()
            || self.amount.is_some()
            || self.currency.is_some()
            || self.merchant.is_some()
            || self.country.is_some()
            || self.date.is_some();
        if !any {
            return Ok(None);
        }

        let mut tx = TransactionContext::new(
            self.channel
                .as_deref()
                .map(Channel::parse)
                .unwrap_or(Channel::Autre),
        );
        tx.amount = self.amount;
        tx.currency = self.currency.map(|c| c.to_uppercase());
        tx.merchant = self.merchant;
        tx.country = self.country;
        tx.date = self.date;
        if let Err(e) = tx.validate() {
            bail!("invalid transaction: {}", e);
        }
        Ok(Some(tx))
    }
}

pub async fn run_ask(
    assistant: &Assistant,
    message: &str,
    transaction: TransactionArgs,
    not_confirmed: bool,
    json: bool,
) -> Result<()> {
    if message.trim().is_empty() {
        bail!("message must not be empty");
    }
    let mut ctx = QueryContext::new(message.trim());
    ctx.transaction = transaction.into_transaction()?;
    if not_confirmed {
        ctx.fraud_confirmed = Some(false);
    }

    assistant.reindex(false).await?;
    let response = assistant.answer(&ctx).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&response)?);
    } else {
        print!("{}", format_response(&response));
    }
    Ok(())
}

pub fn format_response(response: &AgentResponse) -> String {
    let mut out = format!("{}\n", response.customer_message.trim());

    if !response.actions.is_empty() {
        out.push_str("\nActions:\n");
        for (i, action) in response.actions.iter().enumerate() {
            out.push_str(&format!("  {}. {}\n", i + 1, action));
        }
    }

    if !response.missing_info_questions.is_empty() {
        out.push_str("\nQuestions:\n");
        for q in &response.missing_info_questions {
            out.push_str(&format!("  - {}\n", q));
        }
    }

    if !response.citations.is_empty() {
        out.push_str("\nSources:\n");
        for (i, c) in response.citations.iter().enumerate() {
            out.push_str(&format!(
                "  [{}] {} / {} (score {:.2})\n",
                i + 1,
                c.title,
                c.page_or_section,
                c.score
            ));
            out.push_str(&format!("      \"{}\"\n", c.excerpt.replace('\n', " ").trim()));
        }
    }

    if !response.risk_flags.is_empty() {
        let flags: Vec<&str> = response.risk_flags.iter().map(|f| f.name()).collect();
        out.push_str(&format!("\nFlags: {}\n", flags.join(", ")));
    }

    if response.info_not_found {
        out.push_str("\n(info not found)\n");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use fraud_assist_core::models::{Citation, RiskFlag};
    use std::collections::BTreeSet;

    #[test]
    fn test_no_flags_no_transaction() {
        assert!(TransactionArgs::default().into_transaction().unwrap().is_none());
    }

    #[test]
    fn test_transaction_from_flags() {
        let tx = TransactionArgs {
            amount: Some(49.9),
            currency: Some("eur".into()),
            ..Default::default()
        }
        .into_transaction()
        .unwrap()
        .unwrap();
        assert_eq!(tx.channel, Channel::Autre);
        assert_eq!(tx.currency.as_deref(), Some("EUR"));

        let tx = TransactionArgs {
            channel: Some("Virement".into()),
            ..Default::default()
        }
        .into_transaction()
        .unwrap()
        .unwrap();
        assert_eq!(tx.channel, Channel::Virement);
    }

    #[test]
    fn test_invalid_amount_rejected() {
        let err = TransactionArgs {
            amount: Some(-1.0),
            ..Default::default()
        }
        .into_transaction()
        .unwrap_err();
        assert!(err.to_string().contains("invalid transaction"));
    }

    #[test]
    fn test_format_response() {
        let response = AgentResponse {
            customer_message: "Faites opposition.".into(),
            actions: vec!["Appelez le centre d'opposition".into()],
            citations: vec![Citation {
                chunk_id: "c1".into(),
                doc_id: "opposition_carte".into(),
                title: "opposition carte".into(),
                page_or_section: "Étapes".into(),
                excerpt: "Appelez le\ncentre".into(),
                score: 0.8123,
                source_path: "docs/opposition_carte.md".into(),
            }],
            missing_info_questions: vec![],
            risk_flags: BTreeSet::from([RiskFlag::ReversibleCardPayment]),
            info_not_found: false,
        };
        let out = format_response(&response);
        assert!(out.starts_with("Faites opposition.\n"));
        assert!(out.contains("  1. Appelez le centre d'opposition\n"));
        assert!(out.contains("  [1] opposition carte / Étapes (score 0.81)\n"));
        assert!(out.contains("\"Appelez le centre\""));
        assert!(out.contains("Flags: reversible_card_payment"));
        assert!(!out.contains("info not found"));
    }
}
