//! FlagKit Events Lab
//!
//! Verification script for the event pipeline against a local mock endpoint.
//! Run with: cargo run --example sdk-lab
//! Set RUST_LOG=flagkit_events=debug to watch the dispatcher.

use flagkit_events::{
    Context, DiagnosticStore, Event, EventProcessor, EventProcessorBuilder, EventsConfiguration,
    FeatureRequestEvent, HttpProperties, SdkDiagnosticParams,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

const PASS: &str = "\x1b[32m[PASS]\x1b[0m";
const FAIL: &str = "\x1b[31m[FAIL]\x1b[0m";

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    println!("=== FlagKit Events Lab ===\n");

    let mut passed = 0;
    let mut failed = 0;

    macro_rules! pass {
        ($test:expr) => {{
            println!("{} {}", PASS, $test);
            passed += 1;
        }};
    }

    macro_rules! fail {
        ($test:expr) => {{
            println!("{} {}", FAIL, $test);
            failed += 1;
        }};
    }

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(202))
        .mount(&server)
        .await;

    // Setup
    println!("Testing setup...");
    let config = match EventsConfiguration::builder()
        .events_uri(server.uri())
        .capacity(100)
        .private_attribute("email")
        .build()
    {
        Ok(c) => c,
        Err(e) => {
            fail!(format!("Configuration - {}", e));
            print_summary(passed, failed);
            std::process::exit(1);
        }
    };
    pass!("Configuration");

    let store = Arc::new(DiagnosticStore::new(SdkDiagnosticParams::new(
        "sdk_lab_test_key",
        "flagkit-rust",
        flagkit_events::SDK_VERSION,
        "rust",
    )));
    let processor = match EventProcessorBuilder::new(config)
        .http_properties(
            HttpProperties::builder()
                .header("Authorization", "sdk_lab_test_key")
                .build(),
        )
        .diagnostic_store(store)
        .build()
    {
        Ok(p) => p,
        Err(e) => {
            fail!(format!("Processor - {}", e));
            print_summary(passed, failed);
            std::process::exit(1);
        }
    };
    pass!("Processor");

    // Events
    println!("\nTesting event delivery...");
    let user = Context::builder("lab-user-123")
        .name("Lab User")
        .set("email", "lab@example.com")
        .build();
    processor.send_event(Event::identify(user.clone()));
    for variation in [0, 1, 1] {
        processor.send_event(
            FeatureRequestEvent::new(user.clone(), "lab-bool", json!(variation == 1))
                .variation(variation)
                .version(3)
                .default_value(json!(false))
                .into(),
        );
    }
    processor.send_event(Event::custom(
        user,
        "lab_verification",
        Some(json!({"sdk": "rust"})),
        Some(1.0),
    ));

    if processor.flush_blocking().await {
        pass!("flush_blocking()");
    } else {
        fail!("flush_blocking() - timed out");
    }

    let batch = analytics_batch(&server).await;
    let kinds: Vec<&str> = batch.iter().filter_map(|e| e["kind"].as_str()).collect();
    if kinds == ["identify", "custom", "summary"] {
        pass!("Batch contents");
    } else {
        fail!(format!("Batch contents - got {:?}", kinds));
    }

    let redacted = &batch
        .first()
        .map(|e| e["context"]["_meta"]["redactedAttributes"].clone())
        .unwrap_or_default();
    if redacted == &json!(["email"]) {
        pass!("Private attributes redacted");
    } else {
        fail!(format!("Private attributes - got {}", redacted));
    }

    let counters = batch
        .last()
        .map(|s| s["features"]["lab-bool"]["counters"].clone())
        .unwrap_or_default();
    if counters.as_array().map(Vec::len) == Some(2) {
        pass!("Summary counters");
    } else {
        fail!(format!("Summary counters - got {}", counters));
    }

    // Lifecycle
    println!("\nTesting lifecycle...");
    processor.set_in_background(true);
    processor.set_offline(true);
    if processor.is_in_background() && processor.is_offline() {
        pass!("Offline and background flags");
    } else {
        fail!("Offline and background flags");
    }
    processor.set_offline(false);

    processor.close().await;
    if processor.is_closed() {
        pass!("close()");
    } else {
        fail!("close()");
    }

    let diagnostics = count_requests(&server, "/diagnostic").await;
    if diagnostics == 1 {
        pass!("Diagnostic init sent once");
    } else {
        fail!(format!("Diagnostic init - {} payloads", diagnostics));
    }

    print_summary(passed, failed);

    if failed > 0 {
        println!("\n\x1b[31mSome verifications failed!\x1b[0m");
        std::process::exit(1);
    } else {
        println!("\n\x1b[32mAll verifications passed!\x1b[0m");
        std::process::exit(0);
    }
}

async fn analytics_batch(server: &MockServer) -> Vec<Value> {
    for _ in 0..100 {
        let requests = server.received_requests().await.unwrap_or_default();
        if let Some(request) = requests.iter().find(|r| r.url.path() == "/bulk") {
            return serde_json::from_slice(&request.body).unwrap_or_default();
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    Vec::new()
}

async fn count_requests(server: &MockServer, path: &str) -> usize {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|r| r.url.path() == path)
        .count()
}

fn print_summary(passed: i32, failed: i32) {
    println!("\n{}", "=".repeat(40));
    println!("Results: {} passed, {} failed", passed, failed);
    println!("{}", "=".repeat(40));
}
