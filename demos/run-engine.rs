//! An example showcasing how to spin up a [`RequestEngine`], attach an
//! in-memory queue seeded with a couple of items, register a before/after
//! hook pair, and run the dispatch loop to completion.
//!
//! To run this example:
//! ```bash
//! cargo run --example run-engine
//! ```

use std::sync::Arc;

use fetch_swarm::config::EngineConfig;
use fetch_swarm::error::EngineError;
use fetch_swarm::identity::DefaultUserAgentProvider;
use fetch_swarm::item::{Processors, RequestItem};
use fetch_swarm::queue::{InMemoryQueue, RequestQueue};
use fetch_swarm::registry::{AfterArgs, BeforeArgs, Processor};
use fetch_swarm::RequestEngine;
use serde_json::Value;

struct LoggingProcessor;

impl Processor for LoggingProcessor {
    fn process_before(&self, args: BeforeArgs<'_>) -> Value {
        println!("about to fetch {:?}", args.request.url());
        Value::Null
    }

    fn process_after(&self, args: AfterArgs<'_>) {
        println!(
            "finished fetching {:?}: result={}",
            args.request.url(),
            args.result
        );
    }
}

#[tokio::main]
async fn main() -> Result<(), EngineError> {
    // Load environment variables from a .env file, if present (optional).
    dotenvy::dotenv().ok();
    env_logger::init();

    let queue = Arc::new(InMemoryQueue::new());
    queue
        .push(vec![
            RequestItem::new("get", "https://httpbin.org/get")
                .with_processors(Processors {
                    before: Some("log".into()),
                    after: Some("log".into()),
                }),
            RequestItem::new("get", "https://httpbin.org/status/500")
                .with_processors(Processors {
                    before: Some("log".into()),
                    after: Some("log".into()),
                }),
        ])
        .await?;

    let engine = RequestEngine::new();
    engine
        .configure(
            EngineConfig::builder()
                .pool_size(5)
                .max_empty_retry(1)
                .build(),
        )
        .attach_queue(queue)
        .set_user_agent(Arc::new(DefaultUserAgentProvider))
        .register_processor("log", Arc::new(LoggingProcessor));

    engine.run().await?;

    println!("engine stopped; {} failures observed", engine.failure_count());
    Ok(())
}
