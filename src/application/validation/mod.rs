// Event validation ahead of aggregation
pub mod tick_validator;

pub use tick_validator::TickValidator;
