// Operator-confirmed trade execution
pub mod confirmation;

pub use confirmation::{ConfirmationTicket, TradeConfirmationManager};
