//! Built-in step types.

pub mod echo;
pub mod fetch;
pub mod text_analysis;

pub use echo::EchoStep;
pub use fetch::FetchStep;
pub use text_analysis::{KeyPhrasesStep, SentimentStep};
