pub mod error;
pub mod response;
pub mod types;

pub use error::{Error, Result};
pub use response::ApiResponse;
pub use types::{ChatChunk, ChatRequest, RequestId};
