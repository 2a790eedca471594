use anyhow::Result;
use colored::*;
use serde_json::json;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::api_client::ApiClient;
use crate::output::{print_event, TestResult};
use crate::sse_client::Connection;

const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

/// Basic subscription check: a fresh connection receives the synthetic
/// `connected` frame carrying the server's time.
pub async fn test_connection(base_url: &str, user_id: &str) -> Result<TestResult> {
    let start = Instant::now();

    println!("\n{}", "=== TEST: Connection ===".bright_cyan().bold());

    println!("{} Establishing SSE connection...", "→".blue());
    let mut sse = Connection::establish(base_url, user_id, None, "Device 1".to_string()).await?;

    match sse.wait_for_event("connected", EVENT_TIMEOUT).await {
        Ok(event) => {
            print_event(&sse.device_label, &event);

            if event.data["server_time"].as_str().is_some() {
                println!("{} Connected frame carries server time", "✓".green());
                Ok(TestResult {
                    scenario: "connection".to_string(),
                    passed: true,
                    message: None,
                    duration: start.elapsed(),
                })
            } else {
                println!("{} Connected frame missing server time!", "✗".red());
                Ok(TestResult {
                    scenario: "connection".to_string(),
                    passed: false,
                    message: Some(format!("Unexpected connected payload: {}", event.data)),
                    duration: start.elapsed(),
                })
            }
        }
        Err(e) => {
            println!("{} Timeout waiting for connected frame: {}", "✗".red(), e);
            Ok(TestResult {
                scenario: "connection".to_string(),
                passed: false,
                message: Some(format!("Timeout: {}", e)),
                duration: start.elapsed(),
            })
        }
    }
}

/// Multi-device fan-out: one push reaches every live connection the user
/// holds, each frame carrying the scoped event id.
pub async fn test_fan_out(
    base_url: &str,
    user_id: &str,
    api_client: &ApiClient,
) -> Result<TestResult> {
    let start = Instant::now();

    println!("\n{}", "=== TEST: Fan-Out ===".bright_cyan().bold());

    println!("{} Establishing two device connections...", "→".blue());
    let mut device1 =
        Connection::establish(base_url, user_id, None, "Device 1".to_string()).await?;
    let mut device2 =
        Connection::establish(base_url, user_id, None, "Device 2".to_string()).await?;

    device1.wait_for_event("connected", EVENT_TIMEOUT).await?;
    device2.wait_for_event("connected", EVENT_TIMEOUT).await?;
    println!("{} Both devices connected", "✓".green());

    let raw_id = Uuid::new_v4().to_string();
    let expected_id = format!("msg:{}", raw_id);

    println!("{} Pushing message-created event...", "→".blue());
    api_client
        .push(
            user_id,
            "message-created",
            json!({"body": "fan-out check"}),
            &raw_id,
        )
        .await?;

    for device in [&mut device1, &mut device2] {
        match device.wait_for_event("message-created", EVENT_TIMEOUT).await {
            Ok(event) => {
                print_event(&device.device_label, &event);

                if event.id.as_deref() != Some(expected_id.as_str()) {
                    println!("{} Scoped id mismatch!", "✗".red());
                    return Ok(TestResult {
                        scenario: "fan_out".to_string(),
                        passed: false,
                        message: Some(format!(
                            "Expected id={}, got id={:?}",
                            expected_id, event.id
                        )),
                        duration: start.elapsed(),
                    });
                }
            }
            Err(e) => {
                println!(
                    "{} {} never received the event: {}",
                    "✗".red(),
                    device.device_label,
                    e
                );
                return Ok(TestResult {
                    scenario: "fan_out".to_string(),
                    passed: false,
                    message: Some(format!("Timeout: {}", e)),
                    duration: start.elapsed(),
                });
            }
        }
    }

    println!("{} Both devices received the push", "✓".green());
    Ok(TestResult {
        scenario: "fan_out".to_string(),
        passed: true,
        message: None,
        duration: start.elapsed(),
    })
}

/// Reconnect replay: events pushed while a client is away are re-delivered
/// once it resubscribes with its last-seen event id, in order, and without
/// the anchor event itself.
pub async fn test_replay(
    base_url: &str,
    user_id: &str,
    api_client: &ApiClient,
) -> Result<TestResult> {
    let start = Instant::now();

    println!("\n{}", "=== TEST: Reconnect Replay ===".bright_cyan().bold());

    println!("{} Establishing connection...", "→".blue());
    let mut sse = Connection::establish(base_url, user_id, None, "Device 1".to_string()).await?;
    sse.wait_for_event("connected", EVENT_TIMEOUT).await?;

    let anchor_raw = Uuid::new_v4().to_string();
    println!("{} Pushing anchor event...", "→".blue());
    api_client
        .push(
            user_id,
            "message-created",
            json!({"body": "before disconnect"}),
            &anchor_raw,
        )
        .await?;

    let anchor = sse.wait_for_event("message-created", EVENT_TIMEOUT).await?;
    print_event(&sse.device_label, &anchor);
    let Some(anchor_id) = anchor.id.clone() else {
        anyhow::bail!("Anchor event arrived without an id");
    };

    println!("{} Disconnecting...", "→".blue());
    sse.disconnect();

    let missed: Vec<String> = (0..2).map(|_| Uuid::new_v4().to_string()).collect();
    println!("{} Pushing 2 events while disconnected...", "→".blue());
    for (n, raw_id) in missed.iter().enumerate() {
        api_client
            .push(
                user_id,
                "message-created",
                json!({"body": format!("missed #{}", n + 1)}),
                raw_id,
            )
            .await?;
    }

    println!(
        "{} Reconnecting with Last-Event-ID: {}...",
        "→".blue(),
        anchor_id
    );
    let mut sse =
        Connection::establish(base_url, user_id, Some(&anchor_id), "Device 1".to_string()).await?;
    sse.wait_for_event("connected", EVENT_TIMEOUT).await?;

    // The replay must be the exact suffix after the anchor, oldest first.
    for raw_id in &missed {
        let expected_id = format!("msg:{}", raw_id);
        match sse.wait_for_event("message-created", EVENT_TIMEOUT).await {
            Ok(event) => {
                print_event(&sse.device_label, &event);

                if event.id.as_deref() != Some(expected_id.as_str()) {
                    println!("{} Replay out of order or wrong suffix!", "✗".red());
                    return Ok(TestResult {
                        scenario: "replay".to_string(),
                        passed: false,
                        message: Some(format!(
                            "Expected id={}, got id={:?}",
                            expected_id, event.id
                        )),
                        duration: start.elapsed(),
                    });
                }
            }
            Err(e) => {
                println!("{} Missed event was not replayed: {}", "✗".red(), e);
                return Ok(TestResult {
                    scenario: "replay".to_string(),
                    passed: false,
                    message: Some(format!("Timeout: {}", e)),
                    duration: start.elapsed(),
                });
            }
        }
    }

    println!("{} Replay delivered the missed events in order", "✓".green());
    Ok(TestResult {
        scenario: "replay".to_string(),
        passed: true,
        message: None,
        duration: start.elapsed(),
    })
}
