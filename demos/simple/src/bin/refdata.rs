//! Reference data and intraday bar requests against the scripted transport.
//!
//! Reference data replies go through an event handler; intraday bars are read from the
//! per-request reply channel.

use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use colored::*;
use marketsession_rs::client::Session;
use marketsession_rs::connection::{SessionOptions, StopMode};
use marketsession_rs::dispatch::{EventHandler, HandlerResult};
use marketsession_rs::message::{Element, Message};
use marketsession_rs::request::Reply;
use marketsession_rs::transport::{Endpoint, MockTransport, ScriptedReply};
use marketsession_rs::utils::{RequestError, setup_logger};
use std::error::Error;
use std::sync::Arc;
use tracing::{info, warn};

const REFDATA: &str = "//refdata";

struct Printer;

impl EventHandler for Printer {
    fn on_session_status(&mut self, message: &Message) -> HandlerResult {
        info!("{}", message.message_type().to_string().magenta());
        Ok(())
    }

    fn on_partial_response(&mut self, message: &Message) -> HandlerResult {
        info!("{} {}", "partial".yellow(), message.to_json());
        Ok(())
    }

    fn on_response(&mut self, message: &Message) -> HandlerResult {
        info!("{} {}", "final".green(), message.to_json());
        Ok(())
    }

    fn on_request_error(&mut self, message: &Message, error: &RequestError) -> HandlerResult {
        warn!("{} {:?}: {}", "error".red(), message.correlation_id(), error);
        Ok(())
    }
}

fn security_data(security: &str, sequence: i32, price: f64) -> Element {
    Element::complex("securityData")
        .with("security", security)
        .with("sequenceNumber", sequence)
        .with_element(Element::complex("fieldData").with("PX_LAST", price))
}

fn bars() -> Element {
    let start = Utc.with_ymd_and_hms(2024, 3, 1, 14, 30, 0).single().unwrap_or_else(Utc::now);
    let mut ticks = Element::array("barTickData");
    for i in 0..5i64 {
        let open = 180.0 + i as f64 * 0.4;
        ticks = ticks.with_entry(
            Element::complex("barTickData")
                .with("time", start + ChronoDuration::minutes(i * 5))
                .with("open", open)
                .with("high", open + 0.6)
                .with("low", open - 0.3)
                .with("close", open + 0.2)
                .with("volume", 12_000 + i * 250),
        );
    }
    Element::complex("IntradayBarResponse")
        .with_element(Element::complex("barData").with_element(ticks))
}

fn transport() -> MockTransport {
    MockTransport::new()
        .with_service(REFDATA, &["ReferenceDataRequest", "IntradayBarRequest"])
        .with_replies(
            "ReferenceDataRequest",
            vec![
                ScriptedReply::partial(
                    Element::complex("ReferenceDataResponse")
                        .with_element(security_data("IBM US Equity", 0, 191.2)),
                ),
                ScriptedReply::response(
                    Element::complex("ReferenceDataResponse")
                        .with_element(security_data("MSFT US Equity", 1, 411.5)),
                ),
            ],
        )
        .with_replies("IntradayBarRequest", vec![ScriptedReply::response(bars())])
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    setup_logger();

    let session = Session::builder()
        .options(SessionOptions::new(Endpoint::new("localhost", 8194)))
        .transport(Arc::new(transport()))
        .handler(Box::new(Printer))
        .build()?;
    session.start().await?;
    let service = session.open_service(REFDATA).await?;

    let mut request = service.create_request("ReferenceDataRequest")?;
    for security in ["IBM US Equity", "MSFT US Equity"] {
        request.append("securities", security)?;
    }
    request.append("fields", "PX_LAST")?;
    let id = session.send_request(request, None, None).await?;
    info!("Reference data request sent as {}", id);

    let mut request = service.create_request("IntradayBarRequest")?;
    request.set("security", "AAPL US Equity")?;
    request.set("eventType", "TRADE")?;
    request.set("interval", 5)?;
    let (_, mut replies) = session.request(request, None).await?;
    while let Some(reply) = replies.recv().await {
        match reply {
            Reply::Partial(message) | Reply::Final(message) => {
                let ticks = message
                    .payload()
                    .get_path("barData/barTickData")?
                    .values()
                    .to_vec();
                for tick in ticks {
                    info!(
                        "{} open {:.2} close {:.2} volume {}",
                        tick.get_as_datetime("time")?.format("%H:%M").to_string().cyan(),
                        tick.get_as_f64("open")?,
                        tick.get_as_f64("close")?,
                        tick.get_as_i64("volume")?
                    );
                }
            }
            Reply::Failed(error) => warn!("Intraday bars failed: {}", error),
        }
    }

    session.stop(StopMode::Graceful).await;
    if let Some(report) = session.join().await {
        info!(
            "{} events delivered, {} dropped, {} handler failures",
            report.delivered,
            report.dropped,
            report.failures.len()
        );
    }
    Ok(())
}
