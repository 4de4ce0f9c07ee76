//! Operator tool: publish a single question event for end-to-end smoke
//! tests of the indexing pipeline.
//!
//! ```text
//! publish created <id> <title> <content> [tag,tag,...]
//! publish updated <id> <title> <content> [tag,tag,...]
//! publish deleted <id>
//! ```
//!
//! Uses the same config as the search service for the broker URL. Unlike
//! the write side's fire-and-forget path, failures here are surfaced so
//! the operator sees them.

use std::env;
use std::process::ExitCode;

use chrono::Utc;
use tracing::info;

use agora::broker::Broker;
use agora::config::AgoraConfig;
use agora::event::{EventKind, QuestionCreated, QuestionDeleted, QuestionUpdated};
use agora::publisher::EventPublisher;

fn usage() -> ExitCode {
    eprintln!("usage: publish created <id> <title> <content> [tag,tag,...]");
    eprintln!("       publish updated <id> <title> <content> [tag,tag,...]");
    eprintln!("       publish deleted <id>");
    ExitCode::from(2)
}

fn parse_tags(arg: Option<&String>) -> Vec<String> {
    arg.map(|raw| raw.split(',').map(|t| t.trim().to_string()).collect())
        .unwrap_or_default()
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt::init();
    dotenvy::dotenv().ok();

    let args: Vec<String> = env::args().skip(1).collect();
    let Some(kind) = args.first() else {
        return usage();
    };

    let config = match AgoraConfig::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("config error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let broker = match Broker::connect(&config.broker.url, &config.broker.consumer_group).await {
        Ok(broker) => broker,
        Err(e) => {
            eprintln!("broker error: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let publisher = EventPublisher::new(broker);

    let result = match (kind.as_str(), args.get(1)) {
        ("created", Some(id)) => {
            let (Some(title), Some(content)) = (args.get(2), args.get(3)) else {
                return usage();
            };
            let event = QuestionCreated {
                question_id: id.clone(),
                content: content.clone(),
                title: title.clone(),
                created_at: Utc::now(),
                tags: parse_tags(args.get(4)),
            };
            publisher.try_publish(EventKind::Created, &event).await
        }
        ("updated", Some(id)) => {
            let (Some(title), Some(content)) = (args.get(2), args.get(3)) else {
                return usage();
            };
            let event = QuestionUpdated {
                question_id: id.clone(),
                title: title.clone(),
                content: content.clone(),
                tags: parse_tags(args.get(4)),
            };
            publisher.try_publish(EventKind::Updated, &event).await
        }
        ("deleted", Some(id)) => {
            let event = QuestionDeleted {
                question_id: id.clone(),
            };
            publisher.try_publish(EventKind::Deleted, &event).await
        }
        _ => return usage(),
    };

    match result {
        Ok(entry_id) => {
            info!(id = %entry_id, "Event published");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("publish error: {}", e);
            ExitCode::FAILURE
        }
    }
}
