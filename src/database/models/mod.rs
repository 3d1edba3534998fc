pub mod orderflow;

pub use orderflow::OrderflowRow;
