use serde::{Deserialize, Serialize};

use crate::IntegrityError;

/// Lifecycle status of a client in the relational store.
///
/// The store speaks Spanish; the aliases translate at the deserialization
/// boundary so domain code only ever sees the canonical variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClientStatus {
    /// Actively holding or repaying credits
    #[serde(rename = "ACTIVE", alias = "ACTIVO")]
    Active,
    /// Signed up but not yet started
    #[serde(rename = "STARTED", alias = "POR INICIAR")]
    Started,
    /// Application rejected
    #[serde(rename = "REJECTED", alias = "RECHAZADO")]
    Rejected,
    /// No longer operating
    #[serde(rename = "INACTIVE", alias = "INACTIVO")]
    Inactive,
    /// Any status the pipeline does not model explicitly
    #[serde(other)]
    Unknown,
}

impl ClientStatus {
    /// Whether the scoring engine considers this client at all.
    pub fn is_scorable(&self) -> bool {
        !matches!(
            self,
            ClientStatus::Started | ClientStatus::Rejected | ClientStatus::Inactive
        )
    }
}

/// A client of the credit program.
#[derive(Debug, Clone, PartialEq)]
pub struct Contact {
    /// Stable numeric client id
    pub client_id: u64,
    /// Lifecycle status
    pub status: ClientStatus,
    /// GPS devices assigned to this client. One client may hold several
    /// devices; a device belongs to exactly one client.
    pub gps_ids: Vec<String>,
    /// Chain address, immutable once written
    pub celo_address: Option<String>,
    /// The client that referred this one, if any
    pub referrer_id: Option<u64>,
    /// Average credit amount over the client's history
    pub avg_credit_amount: Option<f64>,
    /// Number of real (non-test) credits taken
    pub real_credit_count: Option<u32>,
}

impl Contact {
    /// A contact may not refer itself.
    pub fn check_referrer(&self) -> Result<(), IntegrityError> {
        match self.referrer_id {
            Some(r) if r == self.client_id => Err(IntegrityError::SelfReferral {
                client_id: self.client_id,
            }),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn contact(client_id: u64, referrer_id: Option<u64>) -> Contact {
        Contact {
            client_id,
            status: ClientStatus::Active,
            gps_ids: vec![],
            celo_address: None,
            referrer_id,
            avg_credit_amount: None,
            real_credit_count: None,
        }
    }

    #[test]
    fn self_referral_is_rejected() {
        assert!(contact(7, Some(7)).check_referrer().is_err());
        assert!(contact(7, Some(8)).check_referrer().is_ok());
        assert!(contact(7, None).check_referrer().is_ok());
    }

    #[test]
    fn spanish_statuses_translate() {
        let s: ClientStatus = serde_json::from_str("\"POR INICIAR\"").unwrap();
        assert_eq!(s, ClientStatus::Started);
        assert!(!s.is_scorable());
        let s: ClientStatus = serde_json::from_str("\"ACTIVO\"").unwrap();
        assert!(s.is_scorable());
    }
}
