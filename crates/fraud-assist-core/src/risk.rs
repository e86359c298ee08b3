//! Deterministic transaction risk rules.
//!
//! Flags depend only on the transaction context, never on generated text.

use std::collections::BTreeSet;

use crate::models::{Channel, RiskFlag, TransactionContext};

/// Thresholds behind the risk rules, read from the `[risk]` config section.
#[derive(Debug, Clone, PartialEq)]
pub struct RiskRules {
    pub high_amount_threshold: f64,
    pub high_risk_channels: Vec<Channel>,
    /// ISO country code considered domestic.
    pub home_country: String,
}

impl Default for RiskRules {
    fn default() -> Self {
        Self {
            high_amount_threshold: 1000.0,
            high_risk_channels: vec![Channel::Virement],
            home_country: "FR".to_string(),
        }
    }
}

impl RiskRules {
    pub fn evaluate(&self, tx: &TransactionContext) -> BTreeSet<RiskFlag> {
        let mut flags = BTreeSet::new();

        match tx.channel {
            Channel::Virement => {
                flags.insert(RiskFlag::IrrevocableTransfer);
            }
            Channel::Online | Channel::Terminal => {
                flags.insert(RiskFlag::ReversibleCardPayment);
            }
            Channel::Prelevement => {
                flags.insert(RiskFlag::DirectDebit);
            }
            Channel::Cheque => {
                flags.insert(RiskFlag::ChequePayment);
            }
            Channel::Autre => {}
        }

        if let Some(amount) = tx.amount {
            if amount >= self.high_amount_threshold {
                flags.insert(RiskFlag::HighAmount);
            }
        }

        if self.high_risk_channels.contains(&tx.channel) {
            flags.insert(RiskFlag::HighRiskChannel);
        }

        if let Some(ref country) = tx.country {
            let country = country.trim();
            if !country.is_empty() && !country.eq_ignore_ascii_case(&self.home_country) {
                flags.insert(RiskFlag::ForeignTransaction);
            }
        }

        flags
    }
}
