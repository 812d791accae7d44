//! Starts a generation, walks away from the live feed, and catches up by
//! polling the durable store, the way a reconnecting client would.
use std::sync::Arc;
use std::time::Duration;

use scribe_core::markers;
use scribe_core::prelude::*;
use scribe_core::vendors::openai::OpenAiSource;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), StreamError> {
    scribe_core::observability::init_observability();

    let path = std::env::temp_dir().join("scribe-example.sqlite3");
    let store = SqliteStreamStore::open(&path).await?;
    let engine = StreamEngine::builder()
        .store(Arc::new(store))
        .source(Arc::new(OpenAiSource::from_env()?))
        .records(Arc::new(MemoryRecords::new()))
        .build()?;

    let stream_id = engine
        .create_stream(
            ContextId::new("example-turn"),
            GenerationParams::new("", "Explain write-ahead logging in a paragraph."),
        )
        .await?;
    drop(engine.start(stream_id).await?);

    loop {
        let snapshot = engine.read(stream_id).await?;
        let trace = markers::decode(&snapshot.text);
        println!("[{}] {} chars so far", snapshot.status, trace.display_text.len());
        if snapshot.status.is_terminal() {
            println!("{}", trace.display_text);
            break;
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
    Ok(())
}
