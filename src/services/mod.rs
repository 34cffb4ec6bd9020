pub mod recipes;
pub mod stock;
pub mod valuation;
