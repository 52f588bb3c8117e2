//! Chat load check: concurrent users holding multi-turn sessions against a running gateway.
//! Each user keeps its own session_id, so the per-session lock and rotation are exercised.
//! Run with gateway up: cargo run --bin chat_load [base_url]

use reqwest::Client;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;

const DEFAULT_BASE_URL: &str = "http://127.0.0.1:5000";
const CONCURRENT_USERS: usize = 10;
const TURNS_PER_USER: usize = 5;

// Mix of flagged (canned reply) and ordinary messages.
const MESSAGES: &[&str] = &[
    "I had a long day at work.",
    "I feel hopeless about everything.",
    "My friend hasn't called me back.",
    "I can't sleep lately.",
    "Sometimes I feel worthless.",
    "Tell me about the weather.",
    "I'm stressed about exams.",
    "I just want someone to listen.",
    "Things have been lonely since I moved.",
    "I'm not sure what to do next.",
];

#[tokio::main]
async fn main() {
    let base_url = std::env::args().nth(1).unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
    println!(
        "[CHAT LOAD] Starting — {} users × {} turns = {} requests",
        CONCURRENT_USERS,
        TURNS_PER_USER,
        CONCURRENT_USERS * TURNS_PER_USER
    );
    println!("[CHAT LOAD] Target: {} (ensure gateway is running)", base_url);

    let success = Arc::new(AtomicU32::new(0));
    let failure = Arc::new(AtomicU32::new(0));
    let latencies: Arc<RwLock<Vec<u64>>> = Arc::new(RwLock::new(Vec::new()));
    let client = Client::new();

    let mut handles = Vec::new();
    for user_id in 0..CONCURRENT_USERS {
        let client = client.clone();
        let base_url = base_url.clone();
        let success = Arc::clone(&success);
        let failure = Arc::clone(&failure);
        let latencies = Arc::clone(&latencies);

        handles.push(tokio::spawn(async move {
            let mut session_id: Option<String> = None;
            for turn in 0..TURNS_PER_USER {
                let body = json!({
                    "message": MESSAGES[(user_id + turn) % MESSAGES.len()],
                    "session_id": session_id,
                });

                let start = Instant::now();
                let res = client.post(format!("{}/chat", base_url)).json(&body).send().await;
                let elapsed_ms = start.elapsed().as_millis() as u64;

                let reply = match res {
                    Ok(resp) if resp.status().is_success() => resp.json::<Value>().await.ok(),
                    _ => None,
                };
                match reply {
                    Some(v) => {
                        success.fetch_add(1, Ordering::Relaxed);
                        latencies.write().await.push(elapsed_ms);
                        if session_id.is_none() {
                            session_id = v["session_id"].as_str().map(String::from);
                        }
                    }
                    None => {
                        failure.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
        }));
    }

    for h in handles {
        let _ = h.await;
    }

    let s = success.load(Ordering::Relaxed);
    let f = failure.load(Ordering::Relaxed);
    let total = s + f;
    let success_rate = if total > 0 { (s as f64 / total as f64) * 100.0 } else { 0.0 };
    let latencies_guard = latencies.read().await;
    let avg_latency_ms = if latencies_guard.is_empty() {
        0.0
    } else {
        latencies_guard.iter().sum::<u64>() as f64 / latencies_guard.len() as f64
    };

    println!(
        "[CHAT LOAD] Success rate: {:.1}% | Average latency: {:.0}ms",
        success_rate, avg_latency_ms
    );
    println!("[CHAT LOAD] Total: {} | Success: {} | Failure: {}", total, s, f);

    match client.get(format!("{}/sessions", base_url)).send().await {
        Ok(resp) => match resp.json::<Value>().await {
            Ok(stats) => println!(
                "[CHAT LOAD] Sessions — active: {} | logged: {}",
                stats["active_sessions"], stats["total_logged_sessions"]
            ),
            Err(e) => println!("[CHAT LOAD] Could not read /sessions: {}", e),
        },
        Err(e) => println!("[CHAT LOAD] Could not reach /sessions: {}", e),
    }
}
