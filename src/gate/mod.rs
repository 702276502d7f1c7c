pub mod evaluator;
pub mod expression;

pub use evaluator::GateEvaluator;
pub use expression::{parse_condition, Expr, ParseError};
