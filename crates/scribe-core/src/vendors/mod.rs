/// OpenAI Responses API generation source.
pub mod openai;
