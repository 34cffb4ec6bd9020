pub mod deduct_sale_command;

pub use deduct_sale_command::{
    DeductSaleCommand, DeductSaleResult, IngredientDeduction, SaleLine, SaleLineOutcome, SoldItem,
};
