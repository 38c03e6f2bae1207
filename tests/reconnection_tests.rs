//! Tests for endpoint failover, automatic restart and subscription recovery.

use marketsession_rs::client::Session;
use marketsession_rs::connection::management::{ConnectionState, ReconnectionConfig};
use marketsession_rs::connection::{SessionOptions, StopMode};
use marketsession_rs::message::{CorrelationId, Message, Name};
use marketsession_rs::subscription::{Subscription, SubscriptionStatus};
use marketsession_rs::transport::{Endpoint, MockTransport, Outbound};
use marketsession_rs::utils::ConnectionError;
use std::sync::Arc;
use std::time::Duration;

fn primary() -> Endpoint {
    Endpoint::new("10.0.0.1", 8194)
}

fn secondary() -> Endpoint {
    Endpoint::new("10.0.0.2", 8194)
}

fn session(mock: &Arc<MockTransport>, options: SessionOptions) -> Session {
    Session::new(options, mock.clone()).unwrap()
}

async fn drain(session: &Session) -> Vec<Message> {
    let mut seen = Vec::new();
    while let Some(event) = session.next_event(Duration::from_millis(100)).await {
        seen.extend(event);
    }
    seen
}

/// Polls until a message of type `name` is seen, or gives up after `bound`.
async fn wait_for(session: &Session, name: Name, bound: Duration) -> Vec<Message> {
    let deadline = tokio::time::Instant::now() + bound;
    let mut seen = Vec::new();
    while tokio::time::Instant::now() < deadline {
        if let Some(event) = session.next_event(Duration::from_millis(50)).await {
            for message in event {
                let found = *message.message_type() == name;
                seen.push(message);
                if found {
                    return seen;
                }
            }
        }
    }
    seen
}

fn count(seen: &[Message], name: Name) -> usize {
    seen.iter()
        .filter(|message| *message.message_type() == name)
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Test that start fails over to the next endpoint
    #[tokio::test]
    async fn test_failover_to_secondary() {
        let mock = Arc::new(MockTransport::new().with_unreachable(primary()));
        let options = SessionOptions::new(primary()).with_endpoint(secondary());
        let session = session(&mock, options);

        let endpoint = session.start().await.unwrap();
        assert_eq!(endpoint, secondary());
        assert_eq!(mock.connect_log(), vec![primary(), secondary()]);
        assert_eq!(session.connection_state().await, ConnectionState::Connected);
        assert_eq!(session.current_endpoint().await, Some(secondary()));
    }

    /// Test that every endpoint failing yields AllHostsExhausted and a startup failure
    #[tokio::test]
    async fn test_all_hosts_exhausted() {
        let mock = Arc::new(
            MockTransport::new()
                .with_unreachable(primary())
                .with_unreachable(secondary()),
        );
        let options = SessionOptions::new(primary())
            .with_endpoint(secondary())
            .with_connect_attempts(4);
        let session = session(&mock, options);

        let result = session.start().await;
        assert_eq!(result, Err(ConnectionError::AllHostsExhausted { attempts: 4 }));
        assert_eq!(
            mock.connect_log(),
            vec![primary(), secondary(), primary(), secondary()]
        );
        let seen = drain(&session).await;
        assert_eq!(count(&seen, Name::SessionStartupFailure), 1);
        assert_eq!(count(&seen, Name::SessionStarted), 0);
    }

    /// Test that a dropped link without auto restart only reports the drop
    #[tokio::test]
    async fn test_drop_without_auto_restart() {
        let mock = Arc::new(MockTransport::new());
        let session = session(&mock, SessionOptions::new(primary()));
        session.start().await.unwrap();
        mock.drop_connection("peer reset");

        let seen = wait_for(&session, Name::SessionConnectionDown, Duration::from_secs(1)).await;
        assert_eq!(count(&seen, Name::SessionConnectionDown), 1);
        assert!(drain(&session).await.is_empty());
        assert_eq!(mock.connect_log().len(), 1);
        assert!(!session.is_connected().await);
    }

    /// Test that subscriptions resume after a restart, without the rejected fields and
    /// without duplicate-subscription errors
    #[tokio::test]
    async fn test_auto_restart_resumes_subscriptions() {
        let mock = Arc::new(MockTransport::new().with_bad_fields("MSFT US Equity", &["BAD_FIELD"]));
        let options = SessionOptions::new(primary())
            .with_endpoint(secondary())
            .with_reconnection(ReconnectionConfig::fast())
            .with_auto_restart(true);
        let session = session(&mock, options);
        session.start().await.unwrap();

        let subscriptions = vec![
            Subscription::new("IBM US Equity", vec!["BID".to_string()], 1).unwrap(),
            Subscription::new(
                "MSFT US Equity",
                vec!["BID".to_string(), "BAD_FIELD".to_string()],
                2,
            )
            .unwrap(),
        ];
        session.subscribe(subscriptions, None).await.unwrap();
        let before = drain(&session).await;
        assert_eq!(count(&before, Name::SubscriptionStarted), 2);

        mock.set_reachable(&primary(), false);
        mock.drop_connection("peer reset");

        let mut after =
            wait_for(&session, Name::SessionConnectionUp, Duration::from_secs(2)).await;
        after.extend(drain(&session).await);
        assert_eq!(count(&after, Name::SessionConnectionDown), 1);
        assert_eq!(count(&after, Name::SessionConnectionUp), 1);
        assert_eq!(count(&after, Name::SubscriptionStarted), 2);
        assert_eq!(count(&after, Name::SubscriptionFailure), 0);
        assert_eq!(mock.connected_endpoint(), Some(secondary()));

        let resent: Vec<Subscription> = mock
            .sent()
            .into_iter()
            .filter_map(|frame| match frame {
                Outbound::Subscribe { subscription, .. } => Some(subscription),
                _ => None,
            })
            .skip(2)
            .collect();
        assert_eq!(resent.len(), 2);
        let msft = resent
            .iter()
            .find(|subscription| subscription.topic() == "MSFT US Equity")
            .unwrap();
        assert_eq!(msft.fields(), &["BID".to_string()]);

        assert_eq!(
            session.subscription_status(&CorrelationId::Int(2)),
            Some(SubscriptionStatus::Degraded {
                bad_fields: vec!["BAD_FIELD".to_string()]
            })
        );

        let metrics = session.metrics().await;
        assert_eq!(metrics.successful_reconnections, 1);
        assert_eq!(metrics.subscription_recoveries, 2);
    }

    /// Test that the session terminates once reconnection gives up
    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let mock = Arc::new(MockTransport::new());
        let options = SessionOptions::new(primary())
            .with_reconnection(ReconnectionConfig::fast().with_max_attempts(2))
            .with_auto_restart(true);
        let session = session(&mock, options);
        session.start().await.unwrap();

        mock.set_reachable(&primary(), false);
        mock.drop_connection("peer reset");

        let seen = wait_for(&session, Name::SessionTerminated, Duration::from_secs(2)).await;
        assert_eq!(count(&seen, Name::SessionTerminated), 1);
        assert_eq!(count(&seen, Name::SessionConnectionUp), 0);
        assert!(matches!(
            session.connection_state().await,
            ConnectionState::Failed { .. }
        ));
        assert!(!session.is_connected().await);
        assert_eq!(session.metrics().await.failed_reconnections, 1);

        session.stop(StopMode::Graceful).await;
        assert_eq!(count(&drain(&session).await, Name::SessionTerminated), 0);
    }

    /// Test that a start status left over from the dropped connection, polled before
    /// the reconnection, does not stop the subscription from being resent
    #[tokio::test]
    async fn test_start_polled_after_drop_does_not_block_resume() {
        let mock = Arc::new(MockTransport::new());
        let options = SessionOptions::new(primary())
            .with_reconnection(
                ReconnectionConfig::fast()
                    .with_initial_delay(Duration::from_millis(300))
                    .with_max_delay(Duration::from_millis(500)),
            )
            .with_auto_restart(true);
        let session = session(&mock, options);
        session.start().await.unwrap();

        let subscription = Subscription::new("IBM US Equity", vec!["BID".to_string()], 1).unwrap();
        session.subscribe(vec![subscription], None).await.unwrap();
        mock.drop_connection("peer reset");

        let before = drain(&session).await;
        assert_eq!(count(&before, Name::SubscriptionStarted), 1);
        assert_eq!(count(&before, Name::SessionConnectionDown), 1);
        assert_eq!(
            session.subscription_status(&CorrelationId::Int(1)),
            Some(SubscriptionStatus::Suspended)
        );

        let after = wait_for(&session, Name::SubscriptionStarted, Duration::from_secs(2)).await;
        assert_eq!(count(&after, Name::SessionConnectionUp), 1);
        assert_eq!(mock.active_topics(), vec!["IBM US Equity".to_string()]);
        assert_eq!(
            session.subscription_status(&CorrelationId::Int(1)),
            Some(SubscriptionStatus::Active)
        );
    }

    /// Test that subscriptions submitted while the link is down go out on reconnection
    #[tokio::test]
    async fn test_subscription_queued_while_disconnected() {
        let mock = Arc::new(MockTransport::new());
        let options = SessionOptions::new(primary())
            .with_reconnection(
                ReconnectionConfig::fast()
                    .with_initial_delay(Duration::from_millis(300))
                    .with_max_delay(Duration::from_millis(500)),
            )
            .with_auto_restart(true);
        let session = session(&mock, options);
        session.start().await.unwrap();

        mock.drop_connection("peer reset");
        wait_for(&session, Name::SessionConnectionDown, Duration::from_secs(1)).await;

        let subscription = Subscription::new("IBM US Equity", vec!["BID".to_string()], 5).unwrap();
        session.subscribe(vec![subscription], None).await.unwrap();
        assert_eq!(
            session.subscription_status(&CorrelationId::Int(5)),
            Some(SubscriptionStatus::Pending)
        );

        let seen = wait_for(&session, Name::SubscriptionStarted, Duration::from_secs(2)).await;
        assert_eq!(count(&seen, Name::SessionConnectionUp), 1);
        assert_eq!(
            session.subscription_status(&CorrelationId::Int(5)),
            Some(SubscriptionStatus::Active)
        );
    }
}
