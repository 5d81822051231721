use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use log::*;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
};

use crate::{
    card_terminal::{encode_frame, FrameDecoder},
    config::CardTerminalConfig,
};

/// One step of the scripted conversation on the terminal's first connection. The script starts once the financial
/// transaction request has been received.
#[derive(Debug, Clone)]
pub enum TerminalStep {
    /// Send one framed XML document.
    Send(String),
    /// Write raw bytes, e.g. half a frame or a corrupt length prefix.
    SendRaw(Vec<u8>),
    Pause(Duration),
    /// Wait until an abort request arrives on this connection.
    AwaitAbort,
    /// Close the connection from the terminal's side.
    Close,
}

#[derive(Debug, Clone, Default)]
pub struct ConnectionRecord {
    /// Every frame the terminal received on this connection, in order.
    pub received: Vec<String>,
    /// How many times the POS closed its end of the connection.
    pub closed_by_peer: usize,
}

impl ConnectionRecord {
    pub fn received_abort(&self) -> bool {
        self.received.iter().any(|f| f.contains("<AbortTransactionRequest>"))
    }
}

type Connections = Arc<Mutex<Vec<ConnectionRecord>>>;

/// A card terminal on a random local port.
///
/// The first connection plays the script. Every later connection (e.g. a fallback abort) is only recorded.
pub struct FakeCardTerminal {
    port: u16,
    connections: Connections,
}

impl FakeCardTerminal {
    pub async fn start(script: Vec<TerminalStep>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("Could not bind fake card terminal");
        let port = listener.local_addr().expect("No local address").port();
        let connections = Connections::default();
        let record = Arc::clone(&connections);
        tokio::spawn(async move {
            let mut script = Some(script);
            while let Ok((stream, _)) = listener.accept().await {
                let index = {
                    let mut conns = record.lock().expect("Poisoned lock");
                    conns.push(ConnectionRecord::default());
                    conns.len() - 1
                };
                let steps = script.take().unwrap_or_default();
                tokio::spawn(serve_connection(stream, index, steps, Arc::clone(&record)));
            }
        });
        Self { port, connections }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// A terminal configuration pointing at this fake, with short timeouts.
    pub fn config(&self) -> CardTerminalConfig {
        CardTerminalConfig {
            connect_timeout_ms: 2_000,
            transaction_timeout_secs: 5,
            abort_timeout_ms: 1_000,
            ..CardTerminalConfig::new("127.0.0.1", self.port)
        }
    }

    pub fn connections(&self) -> Vec<ConnectionRecord> {
        self.connections.lock().expect("Poisoned lock").clone()
    }
}

struct Conversation {
    stream: TcpStream,
    decoder: FrameDecoder,
    index: usize,
    record: Connections,
}

impl Conversation {
    /// Reads whatever arrives next. Returns false once the peer has closed the connection.
    async fn read_some(&mut self) -> bool {
        let mut chunk = [0u8; 1024];
        match self.stream.read(&mut chunk).await {
            Ok(0) | Err(_) => {
                self.record.lock().expect("Poisoned lock")[self.index].closed_by_peer += 1;
                false
            },
            Ok(n) => {
                let frames = self.decoder.push(&chunk[..n]).unwrap_or_default();
                self.record.lock().expect("Poisoned lock")[self.index].received.extend(frames);
                true
            },
        }
    }

    fn received(&self) -> usize {
        self.record.lock().expect("Poisoned lock")[self.index].received.len()
    }

    fn received_abort(&self) -> bool {
        self.record.lock().expect("Poisoned lock")[self.index].received_abort()
    }
}

async fn serve_connection(stream: TcpStream, index: usize, script: Vec<TerminalStep>, record: Connections) {
    let mut conv = Conversation { stream, decoder: FrameDecoder::new(), index, record };
    if !script.is_empty() {
        while conv.received() == 0 {
            if !conv.read_some().await {
                return;
            }
        }
    }
    for step in script {
        trace!("💳️ Fake terminal step: {step:?}");
        match step {
            TerminalStep::Send(xml) => {
                let _ = conv.stream.write_all(&encode_frame(&xml)).await;
            },
            TerminalStep::SendRaw(bytes) => {
                let _ = conv.stream.write_all(&bytes).await;
            },
            TerminalStep::Pause(d) => tokio::time::sleep(d).await,
            TerminalStep::AwaitAbort => {
                while !conv.received_abort() {
                    if !conv.read_some().await {
                        return;
                    }
                }
            },
            TerminalStep::Close => {
                let _ = conv.stream.shutdown().await;
                break;
            },
        }
    }
    // Keep listening until the POS hangs up
    while conv.read_some().await {}
}

//--------------------------------------------   XML builders   ------------------------------------------------------
pub fn financial_result_xml(result_code: i64, amount_authorized: i64) -> String {
    let auth_result = if result_code == 0 { "APPROVED" } else { "DECLINED" };
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?><DocumentResponse><FinancialTransactionResponse>\
         <ResultCode>{result_code}</ResultCode><AuthorizationResult>{auth_result}</AuthorizationResult>\
         <AuthorizationResponseCode>00</AuthorizationResponseCode><MaskedPan>************4242</MaskedPan>\
         <ApplicationId>A0000000031010</ApplicationId><ApplicationLabel>VISA</ApplicationLabel>\
         <ApprovalCode>A1B2C3</ApprovalCode><AmountAuthorized>{amount_authorized}</AmountAuthorized>\
         <CustomerReceipt>CARDHOLDER COPY</CustomerReceipt></FinancialTransactionResponse></DocumentResponse>"
    )
}

pub fn card_entry_xml() -> String {
    "<DocumentResponse><CardEntryNotification/></DocumentResponse>".to_string()
}

pub fn card_removal_xml() -> String {
    "<DocumentResponse><CardRemovalNotification/></DocumentResponse>".to_string()
}

pub fn display_xml(text: &str) -> String {
    format!("<DocumentResponse><DisplayNotification><Text>{text}</Text></DisplayNotification></DocumentResponse>")
}

pub fn abort_notification_xml() -> String {
    "<DocumentResponse><AbortNotification/></DocumentResponse>".to_string()
}

pub fn error_xml(code: u32, text: &str) -> String {
    format!(
        "<DocumentResponse><ErrorNotification><ErrorCode>{code}</ErrorCode><ErrorText>{text}</ErrorText>\
         </ErrorNotification></DocumentResponse>"
    )
}
