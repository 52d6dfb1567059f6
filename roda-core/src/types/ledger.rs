use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Lifecycle status of a credit.
///
/// Spanish aliases cover the values as the relational store spells them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CreditStatus {
    /// Approved, disbursement pending
    #[serde(rename = "STARTED", alias = "POR INICIAR")]
    Started,
    /// Fully repaid
    #[serde(rename = "PAID", alias = "PAGADO")]
    Paid,
    /// Written off as uncollectable
    #[serde(rename = "LOST", alias = "PERDIDO")]
    Lost,
    /// Suspended
    #[serde(rename = "INACTIVE", alias = "INACTIVO")]
    Inactive,
    /// Application rejected
    #[serde(rename = "REJECTED", alias = "RECHAZADO")]
    Rejected,
    /// Being repaid
    #[serde(rename = "PENDING", alias = "EN PROCESO")]
    Pending,
}

impl CreditStatus {
    /// A credit still in flight: neither repaid, written off, nor rejected.
    pub fn is_in_process(&self) -> bool {
        !matches!(
            self,
            CreditStatus::Paid | CreditStatus::Lost | CreditStatus::Rejected
        )
    }
}

/// A credit issued to a client.
///
/// Each pipeline reads credits through its own view projection, so the
/// view-dependent fields are optional: the publishers see the money side,
/// the scoring engine sees the delinquency side, and a blank cell in the
/// store simply stays `None`. `total_repayment >= principal` and
/// `term_days > 0` hold whenever the fields are present; `published_flag`,
/// once true, never reverts.
#[derive(Debug, Clone, PartialEq)]
pub struct Credit {
    /// Stable numeric credit id, the NFT token id on chain
    pub credit_id: u64,
    /// Owner of the credit
    pub client_id: u64,
    /// Lifecycle status
    pub status: CreditStatus,
    /// Amount disbursed
    pub principal: Option<i64>,
    /// Principal plus interest and fees
    pub total_repayment: Option<i64>,
    /// Disbursement date
    pub issuance_date: NaiveDate,
    /// Agreed repayment term in days
    pub term_days: Option<u32>,
    /// Average days of delay across instalments
    pub avg_delay_days: Option<f64>,
    /// Total accumulated days of delay
    pub cumulative_delay_days: Option<f64>,
    /// Days the credit is currently delayed
    pub current_delay_days: Option<f64>,
    /// Payment agreements the client honored
    pub fulfilled_agreements: Option<u32>,
    /// Payment agreements made in total
    pub total_agreements: Option<u32>,
    /// Whether the credit was classified as lost
    pub lost_flag: bool,
    /// Whether the credit is already on chain for the current environment
    pub published_flag: bool,
}

/// A repayment against a credit.
#[derive(Debug, Clone, PartialEq)]
pub struct Payment {
    /// Stable numeric payment id
    pub payment_id: u64,
    /// The credit being repaid
    pub credit_id: u64,
    /// Payment date
    pub date: NaiveDate,
    /// Amount paid
    pub amount: i64,
    /// Whether the payment is already on chain for the current environment
    pub published_flag: bool,
    /// Whether the parent credit is already on chain. A payment may only be
    /// published once this is true.
    pub credit_published_flag: bool,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn in_process_excludes_terminal_states() {
        assert!(CreditStatus::Pending.is_in_process());
        assert!(CreditStatus::Started.is_in_process());
        assert!(CreditStatus::Inactive.is_in_process());
        assert!(!CreditStatus::Paid.is_in_process());
        assert!(!CreditStatus::Lost.is_in_process());
        assert!(!CreditStatus::Rejected.is_in_process());
    }

    #[test]
    fn spanish_credit_statuses_translate() {
        let s: CreditStatus = serde_json::from_str("\"EN PROCESO\"").unwrap();
        assert_eq!(s, CreditStatus::Pending);
        let s: CreditStatus = serde_json::from_str("\"PAGADO\"").unwrap();
        assert_eq!(s, CreditStatus::Paid);
    }
}
