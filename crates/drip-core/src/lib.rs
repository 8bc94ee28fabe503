pub mod communication;
pub mod config;
pub mod context;
pub mod delivery;
pub mod driver;
pub mod error;
pub mod expression;
pub mod io;
pub mod outbox;
pub mod paths;
pub mod recipient;
pub mod types;
pub mod value;

pub use error::{DripError, EvaluationError, Result, SyntaxError};
