use std::fmt::Debug;

use async_trait::async_trait;
use futures::sink::{Sink, SinkExt};
use pgwire::api::auth::{
    finish_authentication, protocol_negotiation, save_startup_parameters_to_metadata,
    LoginInfo, ServerParameterProvider, StartupHandler,
};
use pgwire::api::{ClientInfo, PgWireConnectionState};
use pgwire::error::{PgWireError, PgWireResult};
use pgwire::messages::startup::Authentication;
use pgwire::messages::{PgWireBackendMessage, PgWireFrontendMessage};

use crate::observability::AUTH_FAILURES_TOTAL;

/// Cleartext password login against one shared password.
///
/// The user name is logged but not checked. The comparison takes the same
/// time wherever the first mismatching byte is.
pub struct SlotbookStartupHandler<P> {
    password: Vec<u8>,
    parameters: P,
}

impl<P> SlotbookStartupHandler<P> {
    pub fn new(password: String, parameters: P) -> Self {
        Self { password: password.into_bytes(), parameters }
    }
}

#[async_trait]
impl<P: ServerParameterProvider> StartupHandler for SlotbookStartupHandler<P> {
    async fn on_startup<C>(&self, client: &mut C, message: PgWireFrontendMessage) -> PgWireResult<()>
    where
        C: ClientInfo + Sink<PgWireBackendMessage> + Unpin + Send,
        C::Error: Debug,
        PgWireError: From<<C as Sink<PgWireBackendMessage>>::Error>,
    {
        match message {
            PgWireFrontendMessage::Startup(ref startup) => {
                protocol_negotiation(client, startup).await?;
                save_startup_parameters_to_metadata(client, startup);
                client.set_state(PgWireConnectionState::AuthenticationInProgress);
                client
                    .send(PgWireBackendMessage::Authentication(Authentication::CleartextPassword))
                    .await?;
            }
            PgWireFrontendMessage::PasswordMessageFamily(pwd) => {
                let pwd = pwd.into_password()?;
                let login = LoginInfo::from_client_info(client);
                let user = login.user().map(str::to_owned).unwrap_or_default();
                if passwords_match(&self.password, pwd.password.as_bytes()) {
                    tracing::debug!(user = %user, "password login");
                    finish_authentication(client, &self.parameters).await?;
                } else {
                    tracing::warn!(user = %user, "password login refused");
                    metrics::counter!(AUTH_FAILURES_TOTAL).increment(1);
                    return Err(PgWireError::InvalidPassword(user));
                }
            }
            _ => {}
        }
        Ok(())
    }
}

/// Byte comparison whose running time depends only on the input lengths.
fn passwords_match(expected: &[u8], given: &[u8]) -> bool {
    let mut diff = expected.len() ^ given.len();
    for i in 0..expected.len().max(given.len()) {
        let a = expected.get(i).copied().unwrap_or(0);
        let b = given.get(i).copied().unwrap_or(0);
        diff |= usize::from(a ^ b);
    }
    diff == 0
}
