pub mod approval;
pub mod state_machine;
pub mod transaction;

pub use approval::Approval;
pub use state_machine::{PaymentDraft, SettlementOutcome};
pub use transaction::{
    Currency, PaymentReferences, Recipient, Settlement, Transaction, TransactionKind,
    TransactionStatus,
};
