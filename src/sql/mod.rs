//! SQL generation and safety
//!
//! `synthesizer` asks the model for a statement, `validator` screens it and
//! `rewrite` applies scope restriction and the row cap.

pub mod rewrite;
pub mod synthesizer;
pub mod validator;

pub use synthesizer::{QuerySynthesizer, SynthesizedQuery};
pub use validator::{Rejection, SqlValidator};
