pub mod adjust_stock_command;
pub mod record_waste_command;

pub use adjust_stock_command::{AdjustStockCommand, AdjustStockResult};
pub use record_waste_command::{RecordWasteCommand, RecordWasteResult};
