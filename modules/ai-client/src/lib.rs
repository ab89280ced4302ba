pub mod claude;
pub mod error;
pub mod openai;
pub mod openrouter;
pub mod traits;
pub mod util;

pub use claude::Claude;
pub use error::{AiError, Result};
pub use openai::OpenAi;
pub use openrouter::OpenRouter;
pub use traits::{ImageInput, VisionModel, VisionRequest};
pub use util::{extract_json_object, strip_code_blocks, truncate_to_char_boundary};
