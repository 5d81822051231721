use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use log::*;
use pos_common::MinorUnits;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpStream,
    },
    sync::mpsc,
    time::timeout,
};

use crate::{
    card_terminal::{
        classify,
        display_text,
        encode_frame,
        error_text,
        parse_financial_result,
        AbortRequest,
        CardTerminalError,
        FinancialTransactionRequest,
        FrameDecoder,
        MessageKind,
    },
    config::CardTerminalConfig,
    session_registry::{SessionControl, SessionUpdater},
    session_types::{CardDetails, Session, SessionPatch, SessionState},
};

const COMMAND_BUFFER: usize = 4;

/// Requests sent from the façade to the task that owns a session's connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardCommand {
    /// Write an abort request on the session's own connection.
    Abort,
}

/// Runs card transactions against one terminal.
///
/// Each transaction gets its own TCP connection, owned by the task spawned in [`Self::spawn_transaction`]. That task is
/// the only one that ever writes to or closes the connection.
#[derive(Clone)]
pub struct CardTerminalClient {
    config: CardTerminalConfig,
    sync_counter: Arc<AtomicU64>,
}

impl CardTerminalClient {
    pub fn new(config: CardTerminalConfig) -> Self {
        Self { config, sync_counter: Arc::new(AtomicU64::new(0)) }
    }

    pub fn config(&self) -> &CardTerminalConfig {
        &self.config
    }

    /// Sync numbers increase monotonically for the lifetime of the process.
    pub fn next_sync_number(&self) -> u64 {
        self.sync_counter.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Starts the transaction in the background and returns the channel for steering it.
    pub fn spawn_transaction(&self, updater: SessionUpdater, amount: MinorUnits) -> mpsc::Sender<CardCommand> {
        let (sender, receiver) = mpsc::channel(COMMAND_BUFFER);
        let client = self.clone();
        tokio::spawn(async move {
            client.run_transaction(updater, amount, receiver).await;
        });
        sender
    }

    /// Drives one transaction to a terminal state. Every failure ends up recorded in the session.
    pub async fn run_transaction(
        &self,
        updater: SessionUpdater,
        amount: MinorUnits,
        commands: mpsc::Receiver<CardCommand>,
    ) {
        let sync_number = self.next_sync_number();
        let details = CardDetails { sync_number: Some(sync_number), ..Default::default() };
        let patch = SessionPatch::new()
            .with_event("connecting")
            .with_message("Connecting to the card terminal")
            .with_card_details(details);
        updater.apply(patch).await;
        let patch = match self.drive(&updater, amount, sync_number, commands).await {
            Ok(patch) => patch,
            Err(e) => {
                let cancelled = updater.cancel_requested().await;
                warn!("💳️ Card transaction for session {} failed. {e}", updater.id());
                failure_patch(&e, cancelled)
            },
        };
        if let Some(session) = updater.apply(patch).await {
            info!("💳️ Card session {} ended in {}. {}", session.id, session.state, session.message);
        }
    }

    async fn drive(
        &self,
        updater: &SessionUpdater,
        amount: MinorUnits,
        sync_number: u64,
        mut commands: mpsc::Receiver<CardCommand>,
    ) -> Result<SessionPatch, CardTerminalError> {
        let stream = self.connect(self.config.connect_timeout()).await?;
        if updater.cancel_requested().await {
            debug!("💳️ Session {} was cancelled while connecting. The request will not be sent.", updater.id());
            return Ok(SessionPatch::new()
                .with_state(SessionState::Cancelled)
                .with_event("cancelled")
                .with_message("Payment cancelled before it reached the terminal"));
        }
        let (mut reader, mut writer) = stream.into_split();
        let request = FinancialTransactionRequest::new(&self.config, sync_number, amount);
        writer.write_all(&encode_frame(&request.to_xml())).await.map_err(|e| CardTerminalError::Io(e.to_string()))?;
        debug!("💳️ Sent transaction #{sync_number} for {amount} to {}", self.config.address());
        let patch =
            SessionPatch::new().with_event("request_sent").with_message("Follow the instructions on the terminal");
        updater.apply(patch).await;

        let outcome = self.await_result(updater, sync_number, &mut reader, &mut writer, &mut commands).await;
        if let Err(e) = writer.shutdown().await {
            trace!("💳️ Closing the connection for transaction #{sync_number} failed. {e}");
        }
        outcome
    }

    async fn await_result(
        &self,
        updater: &SessionUpdater,
        sync_number: u64,
        reader: &mut OwnedReadHalf,
        writer: &mut OwnedWriteHalf,
        commands: &mut mpsc::Receiver<CardCommand>,
    ) -> Result<SessionPatch, CardTerminalError> {
        let deadline = tokio::time::sleep(self.config.transaction_timeout());
        tokio::pin!(deadline);
        let mut decoder = FrameDecoder::new();
        let mut commands_open = true;
        loop {
            tokio::select! {
                _ = &mut deadline => return Err(CardTerminalError::TransactionTimeout),
                command = commands.recv(), if commands_open => match command {
                    Some(CardCommand::Abort) => {
                        let frame = encode_frame(&AbortRequest::new(&self.config.pos_id, sync_number).to_xml());
                        match writer.write_all(&frame).await {
                            Ok(()) => debug!("💳️ Abort request for transaction #{sync_number} sent"),
                            Err(e) => warn!("💳️ Could not write abort request for transaction #{sync_number}. {e}"),
                        }
                        let patch = SessionPatch::new().with_event("abort_sent").with_message("Cancelling payment");
                        updater.apply(patch).await;
                    },
                    None => commands_open = false,
                },
                read = reader.read_buf(decoder.buffer_mut()) => match read {
                    Ok(0) => return Err(CardTerminalError::ConnectionClosed),
                    Ok(_) => {
                        for frame in decoder.drain()? {
                            if let Some(patch) = self.handle_frame(updater, &frame).await {
                                return Ok(patch);
                            }
                        }
                    },
                    Err(e) => return Err(CardTerminalError::Io(e.to_string())),
                },
            }
        }
    }

    /// Applies a notification to the session, or returns the final patch if the frame ends the transaction.
    async fn handle_frame(&self, updater: &SessionUpdater, frame: &str) -> Option<SessionPatch> {
        let kind = classify(frame);
        trace!("💳️ Session {} received {kind:?}: {frame}", updater.id());
        match kind {
            MessageKind::CardEntry => {
                updater.apply(SessionPatch::new().with_event("card_entry").with_message("Card detected")).await;
                None
            },
            MessageKind::CardRemoval => {
                updater.apply(SessionPatch::new().with_event("card_removal").with_message("Card removed")).await;
                None
            },
            MessageKind::Display => {
                let mut patch = SessionPatch::new().with_event("display");
                if let Some(text) = display_text(frame) {
                    patch = patch.with_message(text);
                }
                updater.apply(patch).await;
                None
            },
            MessageKind::AbortNotification => Some(
                SessionPatch::new()
                    .with_state(SessionState::Cancelled)
                    .with_event("abort")
                    .with_message("Payment cancelled"),
            ),
            MessageKind::FinancialResult => {
                let result = parse_financial_result(frame);
                let cancelled = updater.cancel_requested().await;
                let (state, message) = match (cancelled, result.approved) {
                    (true, _) => (SessionState::Cancelled, "Payment cancelled"),
                    (false, true) => (SessionState::Approved, "Payment approved"),
                    (false, false) => (SessionState::Declined, "Payment declined"),
                };
                if cancelled && result.approved {
                    let id = updater.id();
                    warn!("💳️ Session {id} was approved after cancellation was requested. Recording it as cancelled.");
                }
                Some(
                    SessionPatch::new()
                        .with_state(state)
                        .with_event("financial_result")
                        .with_message(message)
                        .with_card_details(result.into()),
                )
            },
            MessageKind::Error => {
                let text = error_text(frame);
                let details = CardDetails { error: Some(text.clone()), ..Default::default() };
                Some(
                    SessionPatch::new()
                        .with_state(SessionState::Error)
                        .with_event("error")
                        .with_message(text)
                        .with_card_details(details),
                )
            },
            MessageKind::Other => {
                debug!("💳️ Ignoring unrecognised message from the terminal");
                None
            },
        }
    }

    async fn connect(&self, limit: std::time::Duration) -> Result<TcpStream, CardTerminalError> {
        let address = self.config.address();
        match timeout(limit, TcpStream::connect(&address)).await {
            Ok(Ok(stream)) => {
                trace!("💳️ Connected to card terminal at {address}");
                Ok(stream)
            },
            Ok(Err(e)) => Err(CardTerminalError::ConnectFailed { address, reason: e.to_string() }),
            Err(_) => Err(CardTerminalError::ConnectTimeout(address)),
        }
    }

    /// Cancels the session's transaction.
    ///
    /// The connection task is asked to write the abort on its own socket, and independently an abort is sent on a
    /// second short-lived connection. Neither path is awaited; whichever terminal frame arrives first decides the
    /// outcome.
    pub fn abort(&self, session: &Session, control: Option<SessionControl>) {
        if let Some(SessionControl::Card(sender)) = control {
            if let Err(e) = sender.try_send(CardCommand::Abort) {
                debug!("💳️ Could not reach the connection task for session {}. {e}", session.id);
            }
        }
        let Some(sync_number) = session.card_details().and_then(|d| d.sync_number) else {
            debug!("💳️ Session {} has no transaction on the terminal yet. No fallback abort needed.", session.id);
            return;
        };
        let client = self.clone();
        let id = session.id.clone();
        tokio::spawn(async move {
            match client.send_abort_on_new_connection(sync_number).await {
                Ok(()) => debug!("💳️ Fallback abort for session {id} sent"),
                Err(e) => warn!("💳️ Fallback abort for session {id} failed. {e}"),
            }
        });
    }

    /// Writes an abort request for `sync_number` on a fresh connection, bounded by the abort timeout.
    pub async fn send_abort_on_new_connection(&self, sync_number: u64) -> Result<(), CardTerminalError> {
        let limit = self.config.abort_timeout();
        let frame = encode_frame(&AbortRequest::new(&self.config.pos_id, sync_number).to_xml());
        let send = async {
            let mut stream = self.connect(limit).await?;
            stream.write_all(&frame).await.map_err(|e| CardTerminalError::Io(e.to_string()))?;
            if let Err(e) = stream.shutdown().await {
                trace!("💳️ Closing the abort connection failed. {e}");
            }
            Ok::<(), CardTerminalError>(())
        };
        timeout(limit, send).await.map_err(|_| CardTerminalError::ConnectTimeout(self.config.address()))?
    }
}

fn failure_patch(error: &CardTerminalError, cancelled: bool) -> SessionPatch {
    let (state, message) = match error {
        CardTerminalError::TransactionTimeout => (SessionState::Error, "Card transaction timed out".to_string()),
        _ if cancelled => (SessionState::Cancelled, "Payment cancelled".to_string()),
        e => (SessionState::Error, e.to_string()),
    };
    let details = CardDetails { error: Some(error.to_string()), ..Default::default() };
    SessionPatch::new().with_state(state).with_event(error.event_tag()).with_message(message).with_card_details(details)
}
