use std::sync::Arc;

use futures::StreamExt as _;
use scribe_core::prelude::*;
use scribe_core::vendors::openai::{OpenAiParamsExt as _, OpenAiRequestOptions, OpenAiSource};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), StreamError> {
    scribe_core::observability::init_observability();

    let engine = StreamEngine::builder()
        .store(Arc::new(MemoryStreamStore::new()))
        .source(Arc::new(OpenAiSource::from_env()?))
        .records(Arc::new(MemoryRecords::new()))
        .build()?;

    let params = GenerationParams::new("gpt-5-nano", "Stream a short greeting.")
        .system_prompt("Reply in two sentences.")
        .openai_options(OpenAiRequestOptions::default().store(false));
    let stream_id = engine.create_stream(ContextId::new("example"), params).await?;

    let mut live = engine.start(stream_id).await?;
    while let Some(bytes) = live.next().await {
        print!("{}", String::from_utf8_lossy(&bytes));
    }
    println!();

    let (_, outcome) = live.finish().await;
    let snapshot = engine.read(stream_id).await?;
    println!("outcome={outcome:?} status={}", snapshot.status);
    Ok(())
}
