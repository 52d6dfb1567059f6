use thiserror::Error;

/// How a failed submission should be handled, per the publisher contract.
#[derive(Debug, Error)]
pub enum ChainClientError {
    /// The chain already holds this record from a prior run. Benign: mark
    /// the record published and continue.
    #[error("record already on chain: {0}")]
    AlreadyRecorded(String),
    /// Arithmetic overflow revert: for payments this means the amount
    /// exceeds the outstanding balance and is recoverable once.
    #[error("arithmetic overflow revert: {0}")]
    ArithmeticOverflow(String),
    /// Any other revert. Payments treat this as already accounted; routes
    /// and credits treat it as fatal.
    #[error("transaction reverted: {0}")]
    Reverted(String),
    /// The receipt did not appear within the poll budget.
    #[error("no receipt for {tx_hash} within {timeout_secs}s")]
    ReceiptTimeout {
        /// Hash of the pending transaction
        tx_hash: String,
        /// The configured receipt timeout
        timeout_secs: u64,
    },
    /// The node kept answering "not found" past the attempt limit.
    #[error("receipt for {tx_hash} not found after {attempts} attempts")]
    ReceiptNotFound {
        /// Hash of the pending transaction
        tx_hash: String,
        /// Attempts made
        attempts: u32,
    },
    /// Transport or node failure. Fatal for the batch.
    #[error("provider error: {0}")]
    Provider(String),
}

impl ChainClientError {
    /// Classify an error reported by the node while estimating, sending or
    /// executing a transaction. Works on the error text because revert
    /// reasons surface as JSON-RPC error messages whose shape varies by
    /// node implementation.
    pub fn classify(text: impl Into<String>) -> Self {
        let text = text.into();
        let lowered = text.to_ascii_lowercase();
        if lowered.contains("token already minted") || lowered.contains("already exists") {
            ChainClientError::AlreadyRecorded(text)
        } else if lowered.contains("0x11")
            || (lowered.contains("arithmetic")
                && (lowered.contains("overflow") || lowered.contains("underflow")))
        {
            ChainClientError::ArithmeticOverflow(text)
        } else if lowered.contains("revert") {
            ChainClientError::Reverted(text)
        } else {
            ChainClientError::Provider(text)
        }
    }

    /// Whether the publisher may mark the record as published and move on.
    pub fn is_already_recorded(&self) -> bool {
        matches!(self, ChainClientError::AlreadyRecorded(_))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn minted_and_exists_are_benign() {
        let e = ChainClientError::classify(
            "execution reverted: ERC721: token already minted",
        );
        assert!(e.is_already_recorded());
        let e = ChainClientError::classify("execution reverted: route already exists");
        assert!(e.is_already_recorded());
    }

    #[test]
    fn overflow_panics_are_recoverable() {
        let e = ChainClientError::classify(
            "execution reverted: panic: arithmetic underflow or overflow (0x11)",
        );
        assert!(matches!(e, ChainClientError::ArithmeticOverflow(_)));
        let e = ChainClientError::classify(
            "Panic error 0x11: Arithmetic operation results in underflow or overflow.",
        );
        assert!(matches!(e, ChainClientError::ArithmeticOverflow(_)));
    }

    #[test]
    fn generic_reverts_and_transport_errors_are_distinct() {
        let e = ChainClientError::classify("execution reverted: payment window closed");
        assert!(matches!(e, ChainClientError::Reverted(_)));
        let e = ChainClientError::classify("connection refused");
        assert!(matches!(e, ChainClientError::Provider(_)));
    }
}
