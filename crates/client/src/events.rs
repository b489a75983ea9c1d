//! Auth-state change notifications (provider → session store).
//!
//! Providers fan events out to every live subscription. A subscription is
//! consumed by exactly one listener; dropping it unsubscribes, and the next
//! publish prunes the dead sender.

use std::sync::Mutex;

use tokio::sync::mpsc;

use ledgerline_auth::ProviderSession;

/// A provider-originated change of authentication state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEvent {
    /// Startup resolution: the restored session, or none.
    InitialSession(Option<ProviderSession>),
    SignedIn(ProviderSession),
    SignedOut,
    TokenRefreshed(ProviderSession),
    UserUpdated(ProviderSession),
}

impl AuthEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            AuthEvent::InitialSession(_) => "initial_session",
            AuthEvent::SignedIn(_) => "signed_in",
            AuthEvent::SignedOut => "signed_out",
            AuthEvent::TokenRefreshed(_) => "token_refreshed",
            AuthEvent::UserUpdated(_) => "user_updated",
        }
    }

    /// The session this event leaves in place.
    pub fn into_session(self) -> Option<ProviderSession> {
        match self {
            AuthEvent::InitialSession(session) => session,
            AuthEvent::SignedIn(session)
            | AuthEvent::TokenRefreshed(session)
            | AuthEvent::UserUpdated(session) => Some(session),
            AuthEvent::SignedOut => None,
        }
    }
}

/// Receiving end of an auth-change registration.
#[derive(Debug)]
pub struct AuthSubscription {
    receiver: mpsc::UnboundedReceiver<AuthEvent>,
}

impl AuthSubscription {
    pub fn new(receiver: mpsc::UnboundedReceiver<AuthEvent>) -> Self {
        Self { receiver }
    }

    /// Wait for the next event; `None` once the provider is gone.
    pub async fn recv(&mut self) -> Option<AuthEvent> {
        self.receiver.recv().await
    }

    /// Take an already-delivered event without waiting.
    pub fn try_recv(&mut self) -> Option<AuthEvent> {
        self.receiver.try_recv().ok()
    }
}

/// Best-effort fan-out of auth events to subscriptions.
#[derive(Debug, Default)]
pub struct AuthBroadcaster {
    subscribers: Mutex<Vec<mpsc::UnboundedSender<AuthEvent>>>,
}

impl AuthBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> AuthSubscription {
        let (tx, rx) = mpsc::unbounded_channel();

        // A poisoned lock still yields a subscription; it just never receives.
        if let Ok(mut subs) = self.subscribers.lock() {
            subs.push(tx);
        }

        AuthSubscription::new(rx)
    }

    pub fn publish(&self, event: AuthEvent) {
        if let Ok(mut subs) = self.subscribers.lock() {
            subs.retain(|tx| tx.send(event.clone()).is_ok());
        }
    }

    /// Live subscriptions (dead ones are pruned on publish).
    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .map(|subs| subs.iter().filter(|tx| !tx.is_closed()).count())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fan_out_and_unsubscribe() {
        let bus = AuthBroadcaster::new();
        let mut first = bus.subscribe();
        let second = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        drop(second);
        bus.publish(AuthEvent::SignedOut);

        assert_eq!(first.try_recv(), Some(AuthEvent::SignedOut));
        assert_eq!(bus.subscriber_count(), 1);
    }

    #[test]
    fn signed_out_carries_no_session() {
        assert_eq!(AuthEvent::SignedOut.into_session(), None);
        assert_eq!(AuthEvent::InitialSession(None).kind(), "initial_session");
    }
}
