//! Transaction risk scoring example
//!
//! Scores a handful of transaction streams and prints the engine's verdicts.
//! Run with `RUST_LOG=transaction_risk_engine=debug` to see per-transaction logs.

use chrono::{Duration, TimeZone, Utc};
use std::error::Error;
use transaction_risk_engine::{EngineConfig, FraudEngine, Transaction, TransactionType};

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("transaction_risk_engine=info".parse()?),
        )
        .init();

    println!("=== Transaction Risk Engine ===\n");

    let engine = FraudEngine::new(EngineConfig::default())?;
    let monday_noon = Utc
        .with_ymd_and_hms(2024, 3, 4, 12, 0, 0)
        .single()
        .ok_or("invalid timestamp")?;
    let saturday_night = Utc
        .with_ymd_and_hms(2024, 3, 9, 2, 30, 0)
        .single()
        .ok_or("invalid timestamp")?;

    // Example 1: Ordinary payment
    println!("1. Ordinary Payment");
    let payment = Transaction::new("USER-12345", 120.0, TransactionType::Payment)
        .with_recipient("MERCHANT-001")
        .at(monday_noon);
    let result = engine.score_transaction(&payment)?;
    println!("   Risk Score: {:.3}", result.risk_score);
    println!("   Risk Level: {}", result.risk_level);
    println!("   Reasons: {:?}", result.reasons);
    println!();

    // Example 2: Large transfer after small history
    println!("2. Large Transfer After Small History");
    for i in 1..=3 {
        let small = Transaction::new("USER-67890", 100.0, TransactionType::Payment)
            .with_recipient(&format!("MERCHANT-{:03}", i))
            .at(monday_noon + Duration::minutes(2 * i));
        engine.score_transaction(&small)?;
    }
    let large = Transaction::new("USER-67890", 50_000.0, TransactionType::Transfer)
        .with_recipient("ACCT-9999-8888")
        .at(monday_noon + Duration::minutes(8));
    let result = engine.score_transaction(&large)?;
    println!("   Risk Score: {:.3}", result.risk_score);
    println!("   Risk Level: {}", result.risk_level);
    println!("   Requires Review: {}", result.requires_review());
    println!("   Reasons: {:?}", result.reasons);
    println!();

    // Example 3: Rapid burst to one account at night
    println!("3. Rapid Burst to One Account");
    for i in 0..6 {
        let transfer = Transaction::new("USER-11111", 1_000.0, TransactionType::Transfer)
            .with_recipient("ACCT-MULE-0001")
            .at(saturday_night + Duration::seconds(10 * i));
        let analysis = engine.analyze(&transfer)?;
        let verdict = if analysis.result.is_fraud { "FRAUD" } else { "ok" };
        println!(
            "   #{} score {:.3} [{}] {}",
            i + 1,
            analysis.result.risk_score,
            analysis.result.risk_level,
            verdict
        );
    }
    println!();

    // Example 4: Invalid input is rejected
    println!("4. Invalid Transaction (Negative Amount)");
    let invalid = Transaction::new("USER-22222", -1_000.0, TransactionType::Withdrawal);
    match engine.score_transaction(&invalid) {
        Ok(_) => println!("   Unexpectedly accepted"),
        Err(e) => println!("   Rejected: {}", e),
    }
    println!();

    // Example 5: Full analysis as JSON
    println!("5. Latest Analysis as JSON");
    if let Some(latest) = engine.recent_scored(1).pop() {
        println!("{}", latest.result.to_json()?);
    }
    println!();

    println!("=== Recent Alerts ===");
    for alert in engine.recent_alerts(10) {
        println!(
            "   {} user={} level={} score={:.3}",
            alert.transaction_id, alert.user_id, alert.risk_level, alert.risk_score
        );
        println!("     {}", alert.reasons.join("; "));
    }

    println!("\n=== Engine Statistics ===");
    println!("   Transactions scored: {}", engine.transaction_count());
    println!("   Alerts raised: {}", engine.alert_count());
    if let Some(stats) = engine.graph_stats("USER-11111") {
        println!(
            "   USER-11111 graph: {} counterparties, {} edges, {:.2} total",
            stats.node_count, stats.edge_count, stats.total_amount
        );
    }
    let insights = engine.user_insights("USER-11111");
    println!(
        "   USER-11111: {} transactions, avg {:.2}, {} active alerts, fraud rate {:.3}",
        insights.transaction_count,
        insights.average_amount,
        insights.user_active_alerts,
        insights.fraud_rate
    );

    Ok(())
}
