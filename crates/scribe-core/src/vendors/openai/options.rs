/// OpenAI reasoning effort hint.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpenAiReasoningEffort {
    Low,
    Medium,
    High,
}

/// Per-stream OpenAI request options.
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct OpenAiRequestOptions {
    /// Whether OpenAI should store the response server-side.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_effort: Option<OpenAiReasoningEffort>,
    /// Ask for streamed reasoning summaries, rendered as thinking sessions.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub reasoning_summary: bool,
}

impl OpenAiRequestOptions {
    pub fn store(mut self, store: bool) -> Self {
        self.store = Some(store);
        self
    }

    pub fn reasoning_effort(mut self, effort: OpenAiReasoningEffort) -> Self {
        self.reasoning_effort = Some(effort);
        self
    }

    pub fn reasoning_summary(mut self, enabled: bool) -> Self {
        self.reasoning_summary = enabled;
        self
    }
}
