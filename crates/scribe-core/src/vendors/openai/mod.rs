//! OpenAI generation source and request options.
//!
//! Per-stream options travel in `GenerationParams::extra` under the `openai`
//! key so the rest of the engine stays provider-agnostic.
mod config;
mod options;
mod source;
pub(crate) mod transport;

pub use config::OpenAiClientConfig;
pub use options::{OpenAiReasoningEffort, OpenAiRequestOptions};
pub use source::OpenAiSource;

use crate::model::GenerationParams;

/// Key under which OpenAI options are stored in `GenerationParams::extra`.
pub const OPTIONS_KEY: &str = "openai";

/// Extension trait for attaching OpenAI-specific options to generation parameters.
pub trait OpenAiParamsExt {
    fn openai_options(self, options: OpenAiRequestOptions) -> Self;
}

impl OpenAiParamsExt for GenerationParams {
    fn openai_options(mut self, options: OpenAiRequestOptions) -> Self {
        let value = serde_json::to_value(options)
            .expect("OpenAiRequestOptions serialization should be infallible");
        if !self.extra.is_object() {
            self.extra = serde_json::Value::Object(serde_json::Map::new());
        }
        self.extra[OPTIONS_KEY] = value;
        self
    }
}
