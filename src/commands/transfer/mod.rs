pub mod transfer_stock_command;

pub use transfer_stock_command::{TransferStockCommand, TransferStockResult};
