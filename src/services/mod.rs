pub mod locks;
pub mod orchestrator;
pub mod scheduler;

pub use locks::TransactionLocks;
pub use orchestrator::{
    AccountOverview, AuthorizationOrchestrator, CreatePaymentRequest, CurrencyBalance,
    IncomingPaymentRequest, PaymentPolicy, PaymentReceipt, PaymentStatusUpdate, PendingPayment,
    RecentTransaction, SignAction, SignatureReceipt, TransactionDetails, WalletStatus,
};
pub use scheduler::TaskRegistry;
