use std::time::Duration;

/// Tunables for the streaming engine.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// How often the expiry sweeper runs.
    pub sweep_interval: Duration,
    /// Idle time after which a pending/streaming stream is timed out.
    ///
    /// Must exceed the longest legitimate gap between two durable writes of a
    /// single generation.
    pub expiry_window: Duration,
    /// Page size for the sweeper's scan of active streams.
    pub sweep_page_size: usize,
    /// Completed answers shorter than this (in chars, markers stripped) are not
    /// sent for enrichment.
    pub enrichment_min_chars: usize,
    /// Appended to persisted content when a generation is cancelled.
    pub interrupted_annotation: String,
    /// Appended to persisted content when a generation fails.
    pub failed_annotation: String,
    /// Also treat a deleted association as a cancellation request. Needed when
    /// cancellation may come from another process sharing the store.
    pub poll_association: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(60),
            expiry_window: Duration::from_secs(15 * 60),
            sweep_page_size: 100,
            enrichment_min_chars: 100,
            interrupted_annotation: "\n\n*[Response interrupted]*".to_string(),
            failed_annotation: "\n\n*[Generation failed]*".to_string(),
            poll_association: true,
        }
    }
}

impl EngineConfig {
    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    pub fn expiry_window(mut self, window: Duration) -> Self {
        self.expiry_window = window;
        self
    }

    pub fn sweep_page_size(mut self, size: usize) -> Self {
        self.sweep_page_size = size;
        self
    }

    pub fn enrichment_min_chars(mut self, chars: usize) -> Self {
        self.enrichment_min_chars = chars;
        self
    }

    pub fn poll_association(mut self, enabled: bool) -> Self {
        self.poll_association = enabled;
        self
    }

    pub(crate) fn validate(&self) -> Result<(), String> {
        if self.sweep_interval.is_zero() {
            return Err("sweep_interval must be greater than 0".into());
        }
        if self.expiry_window.is_zero() {
            return Err("expiry_window must be greater than 0".into());
        }
        if self.sweep_page_size == 0 {
            return Err("sweep_page_size must be greater than 0".into());
        }
        Ok(())
    }
}
