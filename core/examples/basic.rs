//! Basic circuit breaker usage example
//!
//! Run with `RUST_LOG=breakr=debug` to see the breaker's own logging.

use breakr::{BreakerError, CircuitBreaker, CodedError};
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing subscriber
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "breakr=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    println!("=== Circuit Breaker Basic Example ===\n");

    let breaker = CircuitBreaker::builder("payment_api")
        .failure_threshold(3)
        .reset_timeout(Duration::from_secs(2))
        .execution_timeout(Duration::from_millis(500))
        .window_size(Duration::from_secs(10))
        .failure_codes([500, 502, 503, 504])
        .on_open(|name| println!("🔴 Circuit '{}' opened!", name))
        .on_close(|name| println!("🟢 Circuit '{}' closed!", name))
        .on_half_open(|name| println!("🟡 Circuit '{}' half-open, testing...", name))
        .build()?;

    println!("Initial state: {}\n", breaker.state());

    println!("--- Successful calls ---");
    for i in 1..=2 {
        match breaker
            .execute(move || async move { Ok::<_, CodedError>(format!("Payment {}", i)) })
            .await
        {
            Ok(result) => println!("✓ {}", result),
            Err(e) => println!("✗ Error: {}", e),
        }
    }
    println!("State: {}\n", breaker.state());

    println!("--- Client errors do not count ---");
    let result = breaker
        .execute(|| async { Err::<String, _>(CodedError::new(404, "card not found")) })
        .await;
    println!("✗ {}", result.unwrap_err());
    println!("State: {}, failures: {}\n", breaker.state(), breaker.failure_count());

    println!("--- Triggering failures ---");
    for i in 1..=3 {
        let result = breaker
            .execute(move || async move {
                Err::<String, _>(CodedError::new(503, format!("Payment failed {}", i)))
            })
            .await;
        if let Err(e) = result {
            println!("✗ {}", e);
        }
    }
    println!("State: {} (circuit opened)\n", breaker.state());

    println!("--- Attempting call while open ---");
    match breaker
        .execute(|| async { Ok::<_, CodedError>("Should be rejected") })
        .await
    {
        Err(BreakerError::Open { retry_after, .. }) => {
            println!("✗ Rejected, retry in {:?}", retry_after)
        }
        other => println!("Unexpected: {:?}", other),
    }
    println!();

    println!("--- Waiting for the reset timeout ---");
    tokio::time::sleep(Duration::from_millis(2100)).await;
    println!("State: {}\n", breaker.state());

    println!("--- Probe call ---");
    match breaker
        .execute(|| async { Ok::<_, CodedError>("Payment successful") })
        .await
    {
        Ok(result) => println!("✓ {}", result),
        Err(e) => println!("✗ {}", e),
    }
    println!("State: {}", breaker.state());

    Ok(())
}
