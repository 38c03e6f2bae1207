//! Subscribes to a few equities on the scripted transport and prints their ticks.
//!
//! Usage: `subscription [-auth NONE|LOGON|APP|DIRSVC|USER_APP|USER_DS_APP] [-n <app name>] [-d <ds property>]`

use colored::*;
use marketsession_rs::auth::AuthMode;
use marketsession_rs::client::Session;
use marketsession_rs::connection::{ReconnectionConfig, SessionOptions, StopMode};
use marketsession_rs::message::{Element, Message};
use marketsession_rs::subscription::{FieldException, Subscription, SubscriptionListener};
use marketsession_rs::transport::{Endpoint, MockTransport};
use marketsession_rs::utils::{setup_logger, setup_signal_hook};
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{info, warn};

const TOPICS: [&str; 3] = ["IBM US Equity", "MSFT US Equity", "AAPL US Equity"];
const FIELDS: [&str; 3] = ["LAST_PRICE", "BID", "ASK"];
const MAX_TICKS: u32 = 20;

struct TickPrinter;

impl SubscriptionListener for TickPrinter {
    fn on_subscription(&mut self, subscription: &Subscription) {
        info!("{} {}", "Subscribed".green(), subscription.topic());
    }

    fn on_degraded(&mut self, subscription: &Subscription, bad_fields: &[FieldException]) {
        for exception in bad_fields {
            warn!("{}: {}", subscription.topic().red(), exception);
        }
    }

    fn on_item_update(&self, subscription: &Subscription, message: &Message) {
        let mut output = String::new();
        for field in FIELDS {
            let value = match message.payload().get_as_f64(field) {
                Ok(value) => format!("{:.2}", value).yellow().to_string(),
                Err(_) => "N/A".to_string(),
            };
            output.push_str(&format!("{}: {}, ", field, value));
        }
        info!("{}, {}", subscription.topic().bold(), output);
    }
}

fn arg(args: &[String], flag: &str) -> Option<String> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .cloned()
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    setup_logger();
    let args: Vec<String> = std::env::args().collect();
    let mode: AuthMode = arg(&args, "-auth")
        .unwrap_or_else(|| "NONE".to_string())
        .parse()?;
    let strategy = mode.strategy(arg(&args, "-n").as_deref(), arg(&args, "-d").as_deref())?;

    let transport = Arc::new(
        MockTransport::new()
            .with_unreachable(Endpoint::new("10.0.0.1", 8194))
            .with_bad_fields("AAPL US Equity", &["ASK"]),
    );
    let mut options = SessionOptions::new(Endpoint::new("10.0.0.1", 8194))
        .with_endpoint(Endpoint::new("localhost", 8194))
        .with_reconnection(ReconnectionConfig::fast())
        .with_auto_restart(true);
    if let Some(strategy) = strategy {
        options = options.with_auth(strategy);
    }

    let session = Session::new(options, transport.clone())?;
    let endpoint = session.start().await?;
    info!("Connected to {}", endpoint.to_string().cyan());

    for (i, topic) in TOPICS.iter().enumerate() {
        let subscription = Subscription::new(
            *topic,
            FIELDS.iter().map(|f| f.to_string()).collect(),
            i as i64 + 1,
        )?
        .with_option("interval", "1.0");
        session
            .subscribe_with_listener(subscription, None, Box::new(TickPrinter))
            .await?;
    }

    // Ticks from the scripted backend.
    let publisher = {
        let transport = Arc::clone(&transport);
        tokio::spawn(async move {
            for tick in 0..MAX_TICKS {
                for (i, topic) in TOPICS.iter().enumerate() {
                    let base = 100.0 * (i as f64 + 1.0) + f64::from(tick) * 0.25;
                    transport.publish(
                        topic,
                        Element::complex("MarketDataEvents")
                            .with("LAST_PRICE", base)
                            .with("BID", base - 0.05)
                            .with("ASK", base + 0.05),
                    );
                }
                if tick == MAX_TICKS / 2 {
                    transport.drop_connection("simulated network glitch");
                }
                tokio::time::sleep(Duration::from_millis(250)).await;
            }
        })
    };

    let shutdown_signal = Arc::new(Notify::new());
    setup_signal_hook(Arc::clone(&shutdown_signal)).await?;

    loop {
        tokio::select! {
            _ = shutdown_signal.notified() => {
                info!("Shutdown requested");
                break;
            }
            event = session.next_event(Duration::from_secs(2)) => match event {
                Some(event) => {
                    for message in event.messages() {
                        if message.correlation_id().is_none() {
                            info!("{}", message.message_type().to_string().magenta());
                        }
                    }
                }
                None => {
                    if publisher.is_finished() {
                        break;
                    }
                }
            }
        }
    }

    let metrics = session.metrics().await;
    info!(
        "Reconnections: {}, recovered subscriptions: {}",
        metrics.successful_reconnections, metrics.subscription_recoveries
    );
    session.stop(StopMode::Graceful).await;
    info!("Exiting orderly...");
    Ok(())
}
