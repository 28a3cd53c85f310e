pub mod gemini;
pub mod mock;
pub mod retry;

pub use gemini::{GeminiConfig, GeminiProvider};
pub use mock::{MockProvider, MockResponse};
pub use retry::{RetryConfig, RetryingProvider};
