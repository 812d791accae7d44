use std::collections::VecDeque;
use std::pin::Pin;

use futures::StreamExt as _;
use futures::stream;
use tracing::debug;

use crate::errors::{GenerationError, StreamError};
use crate::model::GenerationParams;
use crate::source::{EventStream, GenerationEvent, GenerationSource, SourceId};

use super::OPTIONS_KEY;
use super::config::OpenAiClientConfig;
use super::options::OpenAiRequestOptions;
use super::transport::{OpenAiSignal, SseDecoder, map_openai_frame};

const OPENAI_SOURCE: &str = "openai";

type ByteStream =
    Pin<Box<dyn futures::Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send + 'static>>;

/// Generation source backed by OpenAI's streaming Responses API.
pub struct OpenAiSource {
    client: reqwest::Client,
    config: OpenAiClientConfig,
}

impl OpenAiSource {
    pub fn new(config: OpenAiClientConfig) -> Result<Self, StreamError> {
        if config.api_key.trim().is_empty() {
            return Err(StreamError::Config(
                "OpenAI client config api_key must not be empty".into(),
            ));
        }
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| StreamError::Config(format!("failed to build OpenAI client: {e}")))?;
        Ok(Self { client, config })
    }

    /// Creates a source from `OPENAI_API_KEY` / `OPENAI_BASE_URL`.
    pub fn from_env() -> Result<Self, StreamError> {
        Self::new(OpenAiClientConfig::from_env()?)
    }
}

#[async_trait::async_trait]
impl GenerationSource for OpenAiSource {
    fn id(&self) -> SourceId {
        SourceId::new(OPENAI_SOURCE)
    }

    async fn start(&self, params: &GenerationParams) -> Result<EventStream, GenerationError> {
        let source_id = self.id();
        let options = read_openai_options(params, &source_id)?;
        let body = build_request_body(params, &options, &self.config.default_model);
        debug!(model = %body["model"], "starting OpenAI responses stream");

        let response = self
            .client
            .post(self.config.responses_url())
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                GenerationError::transport(source_id.clone(), format!("OpenAI request failed: {e}"))
            })?;
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(GenerationError::provider(
                source_id,
                format!("OpenAI responses request failed with status {status}: {body}"),
                Some(status.as_u16()),
            ));
        }

        let bytes_stream: ByteStream = Box::pin(response.bytes_stream());
        Ok(Box::pin(openai_event_stream(source_id, bytes_stream)))
    }
}

fn read_openai_options(
    params: &GenerationParams,
    source_id: &SourceId,
) -> Result<OpenAiRequestOptions, GenerationError> {
    match params.extra.get(OPTIONS_KEY) {
        Some(value) => serde_json::from_value(value.clone()).map_err(|e| {
            GenerationError::protocol(source_id.clone(), format!("invalid OpenAI options: {e}"))
        }),
        None => Ok(OpenAiRequestOptions::default()),
    }
}

pub(crate) fn build_request_body(
    params: &GenerationParams,
    options: &OpenAiRequestOptions,
    default_model: &str,
) -> serde_json::Value {
    let mut input = Vec::new();
    if let Some(system_prompt) = params
        .system_prompt
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
    {
        input.push(serde_json::json!({
            "role": "system",
            "content": system_prompt,
        }));
    }
    input.push(serde_json::json!({
        "role": "user",
        "content": params.prompt,
    }));

    let model = match params.model.trim() {
        "" => default_model,
        model => model,
    };
    let mut body = serde_json::json!({
        "model": model,
        "input": input,
        "stream": true,
        "store": options.store.unwrap_or(false),
    });

    let mut reasoning = serde_json::Map::new();
    if let Some(effort) = options.reasoning_effort.as_ref() {
        reasoning.insert("effort".into(), serde_json::json!(effort));
    }
    if options.reasoning_summary {
        reasoning.insert("summary".into(), serde_json::json!("auto"));
    }
    if !reasoning.is_empty() {
        body["reasoning"] = serde_json::Value::Object(reasoning);
    }
    body
}

fn openai_event_stream(
    source_id: SourceId,
    bytes_stream: ByteStream,
) -> impl futures::Stream<Item = Result<GenerationEvent, GenerationError>> + Send {
    struct State {
        source_id: SourceId,
        bytes_stream: ByteStream,
        decoder: SseDecoder,
        pending: VecDeque<GenerationEvent>,
        completed: bool,
        done: bool,
    }

    impl State {
        fn accept(&mut self, signals: Vec<OpenAiSignal>) {
            for signal in signals {
                if self.completed {
                    return;
                }
                match signal {
                    OpenAiSignal::Event(event) => self.pending.push_back(event),
                    OpenAiSignal::Completed => self.completed = true,
                }
            }
        }
    }

    stream::try_unfold(
        State {
            source_id,
            bytes_stream,
            decoder: SseDecoder::default(),
            pending: VecDeque::new(),
            completed: false,
            done: false,
        },
        |mut state| async move {
            loop {
                if let Some(event) = state.pending.pop_front() {
                    return Ok(Some((event, state)));
                }
                if state.completed {
                    return Ok(None);
                }
                if state.done {
                    return Err(GenerationError::protocol(
                        state.source_id,
                        "OpenAI stream ended without response.completed",
                    ));
                }

                match state.bytes_stream.next().await {
                    Some(Ok(chunk)) => {
                        for frame in state.decoder.push_chunk(&chunk) {
                            let signals = map_openai_frame(&state.source_id, &frame)?;
                            state.accept(signals);
                        }
                    }
                    Some(Err(e)) => {
                        return Err(GenerationError::transport(
                            state.source_id,
                            format!("OpenAI streaming read failed: {e}"),
                        ));
                    }
                    None => {
                        if let Some(frame) = state.decoder.finish() {
                            let signals = map_openai_frame(&state.source_id, &frame)?;
                            state.accept(signals);
                        }
                        state.done = true;
                    }
                }
            }
        },
    )
}
