//! Drives one user message → assistant reply exchange at a time.
//!
//! Lifecycle of an exchange:
//! - `Sending`: the store atomically marks the exchange in flight and appends
//!   the speculative pair, then the transport is opened.
//! - `Streaming`: decoded events are applied in arrival order.
//! - `Committed` on `done`, or `RollingBack` on an `error` frame, a transport
//!   failure, a truncated body or [`ExchangeController::cancel`].
//!
//! Either way the log ends up fully advanced or exactly as it was before the
//! submission.
//!
//! A streaming task learns about cancellation from the store itself: once the
//! in-flight slot no longer holds its own exchange id, it drops the stream.

use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::watch;

use crate::exchange::core::errors::{ExchangeError, ExchangeResult, SessionError, TransportError};
use crate::exchange::core::ids::ExchangeId;
use crate::exchange::core::message::{ChatSession, InFlightExchange};
use crate::exchange::session_store::{IgnoreReason, SessionStore};
use crate::exchange::transport::Transport;
use crate::exchange::wire::{ExchangeEvent, decode_stream, interpret};

/// Result of a submission that did not fail.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SubmitOutcome {
    /// The reply was committed.
    Committed {
        /// Tag of the finished exchange.
        exchange: ExchangeId,
        /// Final assistant text.
        content: String,
    },
    /// Nothing was sent.
    Ignored(IgnoreReason),
    /// The exchange was cancelled and rolled back.
    Cancelled(ExchangeId),
}

/// How the stream loop ended without failing.
enum StreamEnd {
    Done,
    Cancelled,
}

/// Orchestrates exchanges for one session.
pub struct ExchangeController {
    store: Arc<SessionStore>,
    transport: Arc<dyn Transport>,
}

impl ExchangeController {
    /// Create a controller owning the mutations of `store`.
    #[must_use]
    pub fn new(store: Arc<SessionStore>, transport: Arc<dyn Transport>) -> Self {
        Self { store, transport }
    }

    /// Store observed by the host.
    #[must_use]
    pub const fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    /// Send `text` and stream the reply into the session.
    ///
    /// Blank text, or a submission while another exchange is in flight, is
    /// ignored without any network activity.
    ///
    /// # Errors
    /// Returns the failure after the speculative pair has been rolled back.
    pub async fn submit(&self, text: &str) -> ExchangeResult<SubmitOutcome> {
        let exchange = match self.store.begin_exchange(text) {
            Ok(exchange) => exchange,
            Err(reason) => {
                tracing::debug!(?reason, "submission ignored");
                return Ok(SubmitOutcome::Ignored(reason));
            }
        };
        tracing::info!(exchange = %exchange.id, "exchange started");

        match self.stream_reply(&exchange).await {
            Ok(StreamEnd::Done) => self.commit(exchange.id),
            Ok(StreamEnd::Cancelled) => Ok(SubmitOutcome::Cancelled(exchange.id)),
            Err(err) => self.roll_back(&exchange, err),
        }
    }

    /// Abandon the exchange in flight, if any.
    ///
    /// The speculative pair is removed immediately and the streaming task
    /// drops its response stream; events that still arrive for the abandoned
    /// exchange are dropped. Returns whether an exchange was cancelled.
    pub fn cancel(&self) -> bool {
        let Some(active) = self.store.in_flight() else {
            return false;
        };
        match self
            .store
            .rollback_trailing_pair(active.id, &active.submitted_text)
        {
            Ok(()) => {
                tracing::info!(exchange = %active.id, "exchange cancelled");
                true
            }
            Err(err) => {
                tracing::debug!(exchange = %active.id, "nothing to cancel: {err}");
                false
            }
        }
    }

    async fn stream_reply(&self, exchange: &InFlightExchange) -> ExchangeResult<StreamEnd> {
        let cancelled = abandoned(self.store.subscribe(), exchange.id);
        tokio::pin!(cancelled);

        let session_id = self.store.session_id();
        let opened = tokio::select! {
            biased;
            () = &mut cancelled => return Ok(StreamEnd::Cancelled),
            opened = self.transport.open_stream(&session_id, &exchange.submitted_text) => opened?,
        };

        let frames = decode_stream(opened);
        tokio::pin!(frames);

        loop {
            let next = tokio::select! {
                biased;
                () = &mut cancelled => return Ok(StreamEnd::Cancelled),
                next = frames.next() => next,
            };
            let Some(frame) = next else {
                return Err(TransportError::Truncated.into());
            };
            let Some(event) = interpret(&frame?) else {
                continue;
            };

            match event {
                ExchangeEvent::Chunk { content } => {
                    tracing::debug!(exchange = %exchange.id, len = content.len(), "chunk");
                    match self.store.append_assistant_chunk(exchange.id, &content) {
                        Ok(()) => {}
                        Err(SessionError::StaleExchange(_)) => return Ok(StreamEnd::Cancelled),
                        Err(err) => return Err(err.into()),
                    }
                }
                ExchangeEvent::Done => return Ok(StreamEnd::Done),
                ExchangeEvent::Error { message } => return Err(ExchangeError::Protocol(message)),
            }
        }
    }

    fn commit(&self, exchange: ExchangeId) -> ExchangeResult<SubmitOutcome> {
        match self.store.commit_trailing_pair(exchange) {
            Ok(content) => {
                tracing::info!(exchange = %exchange, len = content.len(), "exchange committed");
                Ok(SubmitOutcome::Committed { exchange, content })
            }
            Err(SessionError::StaleExchange(_)) => Ok(SubmitOutcome::Cancelled(exchange)),
            Err(err) => {
                tracing::error!(exchange = %exchange, "commit rejected: {err}");
                Err(err.into())
            }
        }
    }

    fn roll_back(
        &self,
        exchange: &InFlightExchange,
        cause: ExchangeError,
    ) -> ExchangeResult<SubmitOutcome> {
        match self
            .store
            .rollback_trailing_pair(exchange.id, &exchange.submitted_text)
        {
            Ok(()) => {
                match &cause {
                    ExchangeError::Transport(err) => {
                        tracing::warn!(
                            exchange = %exchange.id,
                            auth = err.is_auth_failure(),
                            timeout = err.is_timeout(),
                            "exchange rolled back after transport failure: {err}"
                        );
                    }
                    ExchangeError::Protocol(message) => {
                        tracing::warn!(exchange = %exchange.id, "exchange rolled back on server error: {message}");
                    }
                    ExchangeError::Session(err) => {
                        tracing::error!(exchange = %exchange.id, "exchange rolled back on log error: {err}");
                    }
                }
                Err(cause)
            }
            Err(SessionError::StaleExchange(_)) => Ok(SubmitOutcome::Cancelled(exchange.id)),
            Err(err) => Err(err.into()),
        }
    }
}

/// Resolve once `exchange` is no longer the session's in-flight exchange.
async fn abandoned(mut updates: watch::Receiver<ChatSession>, exchange: ExchangeId) {
    loop {
        let active = updates
            .borrow_and_update()
            .in_flight
            .as_ref()
            .is_some_and(|current| current.id == exchange);
        if !active {
            return;
        }
        if updates.changed().await.is_err() {
            // The store is gone; nothing can cancel this exchange any more.
            std::future::pending::<()>().await;
        }
    }
}
