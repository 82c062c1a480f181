//! Canonical conversation log and its subscription surface.
//!
//! The store is the only place that mutates a [`ChatSession`]. Every mutation
//! runs under the watch channel's write lock, so checking an exchange tag and
//! applying the change cannot interleave with a concurrent cancel.

use chrono::Utc;
use tokio::sync::watch;

use crate::exchange::core::errors::{SessionError, SessionResult};
use crate::exchange::core::ids::{ExchangeId, SessionId};
use crate::exchange::core::message::{ChatSession, InFlightExchange, Message, MessageStatus, Sender};

/// Why a submission did not start an exchange.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum IgnoreReason {
    /// Another exchange is still in flight.
    InFlight,
    /// The text is empty after trimming.
    Blank,
}

/// Observable owner of one conversation log.
pub struct SessionStore {
    state: watch::Sender<ChatSession>,
}

impl SessionStore {
    /// Create a store for an empty session.
    #[must_use]
    pub fn new(session_id: SessionId, active_model: impl Into<String>) -> Self {
        let (state, _) = watch::channel(ChatSession::new(session_id, active_model));
        Self { state }
    }

    /// Create a store seeded with committed history.
    ///
    /// # Errors
    /// Returns an error if the history contains a speculative message.
    pub fn with_history(
        session_id: SessionId,
        active_model: impl Into<String>,
        messages: Vec<Message>,
    ) -> SessionResult<Self> {
        if messages.iter().any(Message::is_speculative) {
            return Err(SessionError::SpeculativeHistory);
        }
        let mut session = ChatSession::new(session_id, active_model);
        session.messages = messages;
        let (state, _) = watch::channel(session);
        Ok(Self { state })
    }

    /// Subscribe to every change of the session.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ChatSession> {
        self.state.subscribe()
    }

    /// Clone the current session.
    #[must_use]
    pub fn snapshot(&self) -> ChatSession {
        self.state.borrow().clone()
    }

    /// Session identifier.
    #[must_use]
    pub fn session_id(&self) -> SessionId {
        self.state.borrow().id.clone()
    }

    /// Exchange currently in flight, if any.
    #[must_use]
    pub fn in_flight(&self) -> Option<InFlightExchange> {
        self.state.borrow().in_flight.clone()
    }

    /// Whether an exchange is currently in flight.
    #[must_use]
    pub fn is_exchange_in_flight(&self) -> bool {
        self.state.borrow().is_exchange_in_flight()
    }

    /// Select the assistant backend for the session.
    pub fn set_model(&self, label: impl Into<String>) {
        let label = label.into();
        self.state.send_if_modified(|session| {
            if session.active_model == label {
                return false;
            }
            session.active_model = label;
            true
        });
    }

    /// Append a speculative message at the tail of the log.
    ///
    /// A user message opens a new exchange and marks it in flight; an
    /// assistant message joins the exchange of the user message before it.
    /// Returns the exchange the message belongs to, so the pair can later be
    /// committed or rolled back.
    ///
    /// # Errors
    /// Returns an error if a user message would start a second speculative
    /// pair, or an assistant message would not directly follow a lone
    /// speculative user message.
    pub fn append_speculative(&self, mut message: Message) -> SessionResult<InFlightExchange> {
        message.status = MessageStatus::Speculative;
        let mut owner = None;
        self.mutate(|session| {
            owner = Some(push_speculative(session, message)?);
            Ok(())
        })?;
        owner.ok_or(SessionError::OrphanAssistant)
    }

    /// Atomically mark an exchange in flight and append its speculative pair.
    ///
    /// The user message carries the trimmed text.
    ///
    /// # Errors
    /// Returns the reason when the submission must be ignored.
    pub fn begin_exchange(&self, text: &str) -> Result<InFlightExchange, IgnoreReason> {
        let submitted = text.trim();
        if submitted.is_empty() {
            return Err(IgnoreReason::Blank);
        }

        let mut started = None;
        self.state.send_if_modified(|session| {
            if session.in_flight.is_some() || session.speculative_tail_len() > 0 {
                return false;
            }
            let Ok(exchange) = push_speculative(session, Message::speculative_user(submitted))
            else {
                return false;
            };
            if push_speculative(session, Message::speculative_assistant()).is_err() {
                return false;
            }
            started = Some(exchange);
            true
        });

        started.ok_or(IgnoreReason::InFlight)
    }

    /// Append streamed text to the speculative assistant message.
    ///
    /// # Errors
    /// Returns [`SessionError::StaleExchange`] if `exchange` is no longer in
    /// flight, or [`SessionError::NoSpeculativeAssistant`] if the tail is not
    /// the speculative assistant slot.
    pub fn append_assistant_chunk(&self, exchange: ExchangeId, text: &str) -> SessionResult<()> {
        self.mutate(|session| {
            ensure_active(session, exchange)?;
            let slot = speculative_assistant_mut(session)?;
            slot.content.push_str(text);
            slot.timestamp = Utc::now();
            Ok(())
        })
    }

    /// Promote the speculative pair to committed and end the exchange.
    ///
    /// Returns the final assistant text.
    ///
    /// # Errors
    /// Returns an error if `exchange` is stale or the tail has no speculative
    /// assistant message.
    pub fn commit_trailing_pair(&self, exchange: ExchangeId) -> SessionResult<String> {
        let mut content = String::new();
        self.mutate(|session| {
            ensure_active(session, exchange)?;
            content = speculative_assistant_mut(session)?.content.clone();
            for message in session.messages.iter_mut().rev() {
                if !message.is_speculative() {
                    break;
                }
                message.status = MessageStatus::Committed;
            }
            session.in_flight = None;
            Ok(())
        })?;
        Ok(content)
    }

    /// Remove the speculative pair and end the exchange.
    ///
    /// The user message is only removed while its text still equals
    /// `original_user_text`; otherwise it is kept as a committed message.
    ///
    /// # Errors
    /// Returns [`SessionError::StaleExchange`] if `exchange` is no longer in
    /// flight; the log is left untouched in that case.
    pub fn rollback_trailing_pair(
        &self,
        exchange: ExchangeId,
        original_user_text: &str,
    ) -> SessionResult<()> {
        self.mutate(|session| {
            ensure_active(session, exchange)?;
            if session
                .messages
                .last()
                .is_some_and(|m| m.is_speculative() && m.sender == Sender::Assistant)
            {
                session.messages.pop();
            }
            let drop_user = match session.messages.last_mut() {
                Some(last) if last.is_speculative() && last.sender == Sender::User => {
                    if last.content != original_user_text {
                        last.status = MessageStatus::Committed;
                    }
                    last.content == original_user_text
                }
                _ => false,
            };
            if drop_user {
                session.messages.pop();
            }
            session.in_flight = None;
            Ok(())
        })
    }

    fn mutate(
        &self,
        apply: impl FnOnce(&mut ChatSession) -> SessionResult<()>,
    ) -> SessionResult<()> {
        let mut failure = None;
        self.state.send_if_modified(|session| match apply(session) {
            Ok(()) => true,
            Err(err) => {
                failure = Some(err);
                false
            }
        });
        failure.map_or(Ok(()), Err)
    }
}

fn ensure_active(session: &ChatSession, exchange: ExchangeId) -> SessionResult<()> {
    match &session.in_flight {
        Some(active) if active.id == exchange => Ok(()),
        _ => Err(SessionError::StaleExchange(exchange)),
    }
}

fn speculative_assistant_mut(session: &mut ChatSession) -> SessionResult<&mut Message> {
    session
        .messages
        .last_mut()
        .filter(|m| m.is_speculative() && m.sender == Sender::Assistant)
        .ok_or(SessionError::NoSpeculativeAssistant)
}

/// Push a speculative message, keeping the in-flight slot in step with the
/// speculative tail.
fn push_speculative(
    session: &mut ChatSession,
    message: Message,
) -> SessionResult<InFlightExchange> {
    let tail = session.speculative_tail_len();
    let exchange = match message.sender {
        Sender::User if tail > 0 || session.in_flight.is_some() => {
            return Err(SessionError::SpeculativePending);
        }
        Sender::User => {
            let exchange = InFlightExchange {
                id: session.next_exchange,
                submitted_text: message.content.clone(),
            };
            session.next_exchange = exchange.id.next();
            session.in_flight = Some(exchange.clone());
            exchange
        }
        Sender::Assistant if tail == 0 => return Err(SessionError::OrphanAssistant),
        Sender::Assistant if tail > 1 => return Err(SessionError::SpeculativePending),
        Sender::Assistant => {
            let after_user = session
                .messages
                .last()
                .is_some_and(|m| m.sender == Sender::User);
            match (&session.in_flight, after_user) {
                (Some(active), true) => active.clone(),
                _ => return Err(SessionError::OrphanAssistant),
            }
        }
    };
    session.messages.push(message);
    Ok(exchange)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> SessionStore {
        SessionStore::with_history(
            SessionId::from("session-1"),
            "default",
            vec![Message::user("earlier"), Message::assistant("reply")],
        )
        .unwrap()
    }

    #[test]
    fn test_begin_exchange_appends_speculative_pair() {
        let store = store();
        let exchange = store.begin_exchange("  hello  ").unwrap();
        assert_eq!(exchange.submitted_text, "hello");

        let session = store.snapshot();
        assert_eq!(session.messages.len(), 4);
        assert_eq!(session.speculative_tail_len(), 2);
        assert_eq!(session.messages[2].content, "hello");
        assert_eq!(session.messages[3].sender, Sender::Assistant);
        assert_eq!(session.in_flight, Some(exchange));
    }

    #[test]
    fn test_begin_exchange_guards() {
        let store = store();
        assert_eq!(store.begin_exchange("   ").unwrap_err(), IgnoreReason::Blank);
        let first = store.begin_exchange("one").unwrap();
        assert_eq!(store.begin_exchange("two").unwrap_err(), IgnoreReason::InFlight);
        assert_eq!(store.snapshot().messages.len(), 4);

        store.rollback_trailing_pair(first.id, "one").unwrap();
        let second = store.begin_exchange("two").unwrap();
        assert!(second.id > first.id);
    }

    #[test]
    fn test_chunks_are_appended_in_order() {
        let store = store();
        let exchange = store.begin_exchange("hi").unwrap();
        for chunk in ["A", "B", "C"] {
            store.append_assistant_chunk(exchange.id, chunk).unwrap();
        }
        let content = store.commit_trailing_pair(exchange.id).unwrap();
        assert_eq!(content, "ABC");

        let session = store.snapshot();
        assert!(!session.is_exchange_in_flight());
        assert_eq!(session.speculative_tail_len(), 0);
        assert_eq!(session.committed_messages().count(), 4);
    }

    #[test]
    fn test_rollback_restores_previous_log() {
        let store = store();
        let before = store.snapshot();
        let exchange = store.begin_exchange("hello").unwrap();
        store.append_assistant_chunk(exchange.id, "partial").unwrap();
        store.rollback_trailing_pair(exchange.id, "hello").unwrap();

        let after = store.snapshot();
        assert_eq!(after.messages, before.messages);
        assert!(!after.is_exchange_in_flight());
    }

    #[test]
    fn test_rollback_keeps_altered_user_message() {
        let store = store();
        let exchange = store.begin_exchange("hello").unwrap();
        store.rollback_trailing_pair(exchange.id, "something else").unwrap();

        let session = store.snapshot();
        assert_eq!(session.messages.len(), 3);
        assert_eq!(session.messages[2].content, "hello");
        assert!(!session.messages[2].is_speculative());
    }

    #[test]
    fn test_stale_exchange_cannot_mutate() {
        let store = store();
        let exchange = store.begin_exchange("hello").unwrap();
        store.rollback_trailing_pair(exchange.id, "hello").unwrap();
        let before = store.snapshot();

        assert_eq!(
            store.append_assistant_chunk(exchange.id, "late"),
            Err(SessionError::StaleExchange(exchange.id))
        );
        assert_eq!(
            store.commit_trailing_pair(exchange.id),
            Err(SessionError::StaleExchange(exchange.id))
        );
        assert_eq!(
            store.rollback_trailing_pair(exchange.id, "hello"),
            Err(SessionError::StaleExchange(exchange.id))
        );
        assert_eq!(store.snapshot(), before);
    }

    #[test]
    fn test_append_speculative_enforces_pair_shape() {
        let store = store();
        assert_eq!(
            store.append_speculative(Message::speculative_assistant()),
            Err(SessionError::OrphanAssistant)
        );
        let opened = store.append_speculative(Message::user("typed")).unwrap();
        assert_eq!(opened.submitted_text, "typed");
        assert_eq!(
            store.append_speculative(Message::user("again")),
            Err(SessionError::SpeculativePending)
        );
        let joined = store.append_speculative(Message::assistant("")).unwrap();
        assert_eq!(joined, opened);
        assert_eq!(
            store.append_speculative(Message::speculative_assistant()),
            Err(SessionError::SpeculativePending)
        );

        let session = store.snapshot();
        assert_eq!(session.speculative_tail_len(), 2);
        assert!(session.messages.iter().rev().take(2).all(Message::is_speculative));
        assert_eq!(session.in_flight, Some(opened));
    }

    #[test]
    fn test_appended_pair_can_be_committed() {
        let store = store();
        let exchange = store.append_speculative(Message::user("typed")).unwrap();
        store.append_speculative(Message::speculative_assistant()).unwrap();
        assert_eq!(store.begin_exchange("other").unwrap_err(), IgnoreReason::InFlight);

        store.append_assistant_chunk(exchange.id, "answer").unwrap();
        assert_eq!(store.commit_trailing_pair(exchange.id).unwrap(), "answer");

        let session = store.snapshot();
        assert!(!session.is_exchange_in_flight());
        assert_eq!(session.speculative_tail_len(), 0);
        let next = store.begin_exchange("next").unwrap();
        assert!(next.id > exchange.id);
    }

    #[test]
    fn test_appended_pair_can_be_rolled_back() {
        let store = store();
        let before = store.snapshot().messages;
        let exchange = store.append_speculative(Message::user("typed")).unwrap();
        store.append_speculative(Message::speculative_assistant()).unwrap();

        store.rollback_trailing_pair(exchange.id, "typed").unwrap();
        let session = store.snapshot();
        assert_eq!(session.messages, before);
        assert!(!session.is_exchange_in_flight());

        let lone = store.append_speculative(Message::user("alone")).unwrap();
        store.rollback_trailing_pair(lone.id, "alone").unwrap();
        assert_eq!(store.snapshot().messages, before);
        assert!(store.begin_exchange("again").is_ok());
    }

    #[test]
    fn test_history_rejects_speculative_messages() {
        let result = SessionStore::with_history(
            SessionId::from("s"),
            "default",
            vec![Message::speculative_user("x")],
        );
        assert!(matches!(result, Err(SessionError::SpeculativeHistory)));
    }

    #[test]
    fn test_subscribers_see_changes() {
        let store = store();
        let mut rx = store.subscribe();
        assert!(!rx.has_changed().unwrap());

        store.set_model("storyteller");
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().active_model, "storyteller");

        store.set_model("storyteller");
        assert!(!rx.has_changed().unwrap());

        let exchange = store.begin_exchange("hi").unwrap();
        store.append_assistant_chunk(exchange.id, "yo").unwrap();
        assert!(rx.has_changed().unwrap());
        let view = rx.borrow_and_update();
        assert_eq!(view.last_assistant().map(|m| m.content.as_str()), Some("yo"));
    }

    #[test]
    fn test_failed_mutation_does_not_notify() {
        let store = store();
        let rx = store.subscribe();
        let _ = store.append_assistant_chunk(ExchangeId::FIRST, "nope");
        assert!(!rx.has_changed().unwrap());
    }
}
