//! Token generation and authorization against an auth service.

use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::auth::identity::{Entitlement, Identity, Token};
use crate::client::QueueRouter;
use crate::connection::ConnectionManager;
use crate::message::{CorrelationIdGenerator, Message, Name, element_names};
use crate::request::Service;
use crate::transport::Outbound;
use crate::utils::AuthError;

/// Token generation followed by authorization.
///
/// Each step sends one frame and waits, bounded by the session's `auth_timeout`, on a
/// private queue for the terminal reply. A failure type resolves the step at once;
/// anything else received meanwhile is logged and ignored.
#[derive(Debug, Clone)]
pub struct AuthenticationFlow {
    connection: Arc<ConnectionManager>,
    router: Arc<QueueRouter>,
    ids: Arc<CorrelationIdGenerator>,
    timeout: Duration,
}

enum Outcome<T> {
    Success(T),
    Failure { category: String, description: String },
}

fn failure<T>(message: &Message) -> Outcome<T> {
    let (category, description) = match message.reason() {
        Some(info) => (info.category, info.description),
        None => ("UNKNOWN".to_string(), message.message_type().to_string()),
    };
    Outcome::Failure {
        category,
        description,
    }
}

impl AuthenticationFlow {
    pub(crate) fn new(
        connection: Arc<ConnectionManager>,
        router: Arc<QueueRouter>,
        ids: Arc<CorrelationIdGenerator>,
    ) -> Self {
        let timeout = connection.options().auth_timeout;
        Self {
            connection,
            router,
            ids,
            timeout,
        }
    }

    /// Generates a token using the configured strategy's options.
    ///
    /// # Errors
    ///
    /// [`AuthError::TokenGenerationFailed`] on a failure reply, [`AuthError::Timeout`]
    /// when no reply arrives in time, [`AuthError::Connection`] when the frame cannot be
    /// sent.
    pub async fn generate_token(&self) -> Result<Token, AuthError> {
        let correlation_id = self.ids.next_id();
        let mut queue = self.router.open(correlation_id.clone());
        self.connection
            .send(Outbound::GenerateToken {
                correlation_id,
                auth_options: self.connection.options().auth_options(),
            })
            .await?;

        let outcome = queue
            .wait_for(self.timeout, |message| match message.message_type() {
                Name::TokenGenerationSuccess => Some(
                    match message.payload().get_as_str(element_names::TOKEN) {
                        Ok(token) => Outcome::Success(Token::new(token)),
                        Err(e) => Outcome::Failure {
                            category: "DECODE".to_string(),
                            description: e.to_string(),
                        },
                    },
                ),
                Name::TokenGenerationFailure => Some(failure(message)),
                _ => None,
            })
            .await;

        match outcome {
            Some(Outcome::Success(token)) => {
                info!("Token generated");
                Ok(token)
            }
            Some(Outcome::Failure {
                category,
                description,
            }) => {
                warn!("Token generation failed: {} - {}", category, description);
                Err(AuthError::TokenGenerationFailed {
                    category,
                    description,
                })
            }
            None => {
                warn!("Token generation timed out after {:?}", self.timeout);
                Err(AuthError::Timeout(self.timeout))
            }
        }
    }

    /// Authorizes `token` against `service`.
    ///
    /// # Errors
    ///
    /// [`AuthError::AuthorizationFailed`] on a denial, [`AuthError::Timeout`] when no
    /// reply arrives in time, [`AuthError::Connection`] when the frame cannot be sent.
    pub async fn authorize(&self, token: &Token, service: &Service) -> Result<Identity, AuthError> {
        let mut request = service.create_authorization_request();
        request
            .set(element_names::TOKEN, token.as_str())
            .map_err(|e| AuthError::InvalidStrategy(e.to_string()))?;
        if let Some(strategy) = &self.connection.options().auth {
            strategy
                .decorate_authorization(&mut request)
                .map_err(|e| AuthError::InvalidStrategy(e.to_string()))?;
        }

        let correlation_id = self.ids.next_id();
        let identity = Identity::new(correlation_id.clone());
        let mut queue = self.router.open(correlation_id.clone());
        self.connection
            .send(Outbound::Authorize {
                correlation_id,
                token: token.as_str().to_string(),
                request,
            })
            .await?;

        let outcome = queue
            .wait_for(self.timeout, |message| match message.message_type() {
                Name::AuthorizationSuccess => Some(Outcome::Success(())),
                Name::AuthorizationFailure => Some(failure(message)),
                _ => None,
            })
            .await;

        match outcome {
            Some(Outcome::Success(())) => {
                identity.resolve(Entitlement::Granted)?;
                info!("Authorized against {}", service.name());
                Ok(identity)
            }
            Some(Outcome::Failure {
                category,
                description,
            }) => {
                warn!("Authorization failed: {} - {}", category, description);
                identity.resolve(Entitlement::Denied {
                    category: category.clone(),
                    description: description.clone(),
                })?;
                Err(AuthError::AuthorizationFailed {
                    category,
                    description,
                })
            }
            None => {
                warn!("Authorization timed out after {:?}", self.timeout);
                Err(AuthError::Timeout(self.timeout))
            }
        }
    }

    /// Generates a token and authorizes it against `service`.
    ///
    /// # Errors
    ///
    /// The first error of either step; authorization is never attempted when token
    /// generation fails.
    pub async fn authenticate(&self, service: &Service) -> Result<Identity, AuthError> {
        let token = self.generate_token().await?;
        self.authorize(&token, service).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::SessionOptions;
    use crate::transport::{MockTransport, TransportEvent};
    use tokio::sync::mpsc;
    use tokio::time::Instant;

    async fn flow(
        mock: Arc<MockTransport>,
        options: SessionOptions,
    ) -> (AuthenticationFlow, tokio::task::JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let connection = Arc::new(ConnectionManager::new(mock, options, tx));
        connection.start().await.unwrap();
        let router = Arc::new(QueueRouter::new(8));
        let pump_router = Arc::clone(&router);
        let pump = tokio::spawn(async move {
            while let Some(TransportEvent::Event(event)) = rx.recv().await {
                pump_router.route(event);
            }
        });
        let flow = AuthenticationFlow::new(
            connection,
            router,
            Arc::new(CorrelationIdGenerator::new()),
        );
        (flow, pump)
    }

    fn apiauth() -> Service {
        Service::new("//svc/apiauth", Vec::new())
    }

    #[tokio::test]
    async fn test_authenticate_success() {
        let mock = Arc::new(MockTransport::new());
        let (flow, _pump) = flow(mock.clone(), SessionOptions::default()).await;

        let identity = flow.authenticate(&apiauth()).await.unwrap();
        assert!(identity.is_authorized());

        let sent = mock.sent();
        assert!(matches!(sent[0], Outbound::GenerateToken { .. }));
        match &sent[1] {
            Outbound::Authorize { token, request, .. } => {
                assert_eq!(token, "token-1");
                assert_eq!(
                    request.payload().get_as_str(element_names::TOKEN).unwrap(),
                    "token-1"
                );
            }
            other => panic!("unexpected frame {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_token_failure_aborts_authorization() {
        let mock = Arc::new(MockTransport::new().with_token_failure("NO_AUTH", "not entitled"));
        let (flow, _pump) = flow(mock.clone(), SessionOptions::default()).await;

        let err = flow.authenticate(&apiauth()).await.unwrap_err();
        assert_eq!(
            err,
            AuthError::TokenGenerationFailed {
                category: "NO_AUTH".to_string(),
                description: "not entitled".to_string(),
            }
        );
        assert_eq!(mock.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_authorization_denied() {
        let mock = Arc::new(MockTransport::new().with_authorization_denied("DENIED", "no access"));
        let (flow, _pump) = flow(mock, SessionOptions::default()).await;

        let err = flow.authenticate(&apiauth()).await.unwrap_err();
        assert!(matches!(err, AuthError::AuthorizationFailed { .. }));
    }

    #[tokio::test]
    async fn test_authorization_wait_is_bounded() {
        let mock = Arc::new(MockTransport::new().withholding_authorization());
        let options = SessionOptions::default().with_auth_timeout(Duration::from_millis(50));
        let (flow, _pump) = flow(mock, options).await;

        let token = flow.generate_token().await.unwrap();
        let started = Instant::now();
        let err = flow.authorize(&token, &apiauth()).await.unwrap_err();
        assert_eq!(err, AuthError::Timeout(Duration::from_millis(50)));
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}
