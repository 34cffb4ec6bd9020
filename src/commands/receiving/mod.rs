pub mod receive_purchase_command;

pub use receive_purchase_command::{
    PurchaseLine, ReceiptLineOutcome, ReceivePurchaseCommand, ReceivePurchaseResult,
};
