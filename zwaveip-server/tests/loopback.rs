//! Client and server talking over loopback

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use zwaveip_client::{ClientBuilder, ZipClient};
use zwaveip_core::{Psk, ZipError, ZipResult};
use zwaveip_server::{ServerConfig, ServerListener};
use zwaveip_session::{SessionHandle, SessionHandler, TransmitStatus};
use zwaveip_transport::{DtlsSettings, Security};

const BASIC_GET: [u8; 2] = [0x20, 0x02];
const BASIC_REPORT: [u8; 3] = [0x20, 0x03, 0xFF];

#[derive(Debug, PartialEq)]
enum Event {
    Command(Vec<u8>),
    Done(TransmitStatus),
}

/// Records callbacks; answers Basic Get with a Basic Report when `answer` is set
struct Node {
    events: mpsc::UnboundedSender<Event>,
    answer: bool,
}

impl SessionHandler for Node {
    fn on_application_command(&self, session: &SessionHandle, payload: &[u8]) {
        let _ = self.events.send(Event::Command(payload.to_vec()));
        if self.answer && payload == BASIC_GET {
            if let Err(e) = session.send_command(&BASIC_REPORT, false) {
                panic!("report not sent: {}", e);
            }
        }
    }

    fn on_transmit_done(&self, _session: &SessionHandle, status: TransmitStatus) {
        let _ = self.events.send(Event::Done(status));
    }
}

fn node(answer: bool) -> (Arc<Node>, mpsc::UnboundedReceiver<Event>) {
    let (events, rx) = mpsc::unbounded_channel();
    (Arc::new(Node { events, answer }), rx)
}

async fn next_event(events: &mut mpsc::UnboundedReceiver<Event>) -> anyhow::Result<Event> {
    tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await?
        .ok_or_else(|| anyhow::anyhow!("handler dropped"))
}

struct Server {
    addr: SocketAddr,
    stop: CancellationToken,
    task: JoinHandle<ZipResult<()>>,
    events: mpsc::UnboundedReceiver<Event>,
}

impl Server {
    async fn start(security: Security) -> anyhow::Result<Self> {
        let (handler, events) = node(true);
        let config = ServerConfig::new(security).with_address("127.0.0.1:0".parse()?);
        let listener = ServerListener::bind(config, handler).await?;
        Ok(Self {
            addr: listener.local_addr(),
            stop: listener.shutdown_token(),
            task: tokio::spawn(listener.run()),
            events,
        })
    }

    async fn shutdown(self) -> anyhow::Result<()> {
        self.stop.cancel();
        tokio::time::timeout(Duration::from_secs(2), self.task).await???;
        Ok(())
    }
}

async fn exchange(
    client: &ZipClient,
    client_events: &mut mpsc::UnboundedReceiver<Event>,
    server_events: &mut mpsc::UnboundedReceiver<Event>,
) -> anyhow::Result<()> {
    let transmission = client.send_command(&BASIC_GET, true)?;
    assert_eq!(transmission.completion().await, TransmitStatus::Ok);

    assert_eq!(next_event(server_events).await?, Event::Command(BASIC_GET.to_vec()));

    // The client sees its own completion and then the report
    assert_eq!(next_event(client_events).await?, Event::Done(TransmitStatus::Ok));
    assert_eq!(next_event(client_events).await?, Event::Command(BASIC_REPORT.to_vec()));

    // The client acknowledged the report
    assert_eq!(next_event(server_events).await?, Event::Done(TransmitStatus::Ok));
    Ok(())
}

#[tokio::test]
async fn test_udp_round_trip() -> anyhow::Result<()> {
    let mut server = Server::start(Security::Udp).await?;
    let (handler, mut client_events) = node(false);

    let client = ClientBuilder::new().address(server.addr.to_string()).connect(handler).await?;
    exchange(&client, &mut client_events, &mut server.events).await?;

    client.stop().await?;
    server.shutdown().await
}

#[tokio::test]
async fn test_dtls_round_trip() -> anyhow::Result<()> {
    let psk = Psk::from_hex("123456789012345678901234567890AA")?;
    let mut server = Server::start(Security::Dtls(DtlsSettings::new(psk.clone()))).await?;
    let (handler, mut client_events) = node(false);

    let client = ClientBuilder::new()
        .address(server.addr.to_string())
        .dtls(psk)
        .connect(handler)
        .await?;
    assert!(client.is_secure());
    exchange(&client, &mut client_events, &mut server.events).await?;

    client.stop().await?;
    server.shutdown().await
}

#[tokio::test]
async fn test_dtls_wrong_key_is_rejected() -> anyhow::Result<()> {
    let server = Server::start(Security::Dtls(DtlsSettings::new(Psk::default()))).await?;
    let (handler, _client_events) = node(false);

    let mut settings = DtlsSettings::new(Psk::new(vec![0x55; 16])?);
    settings.handshake_timeout = Duration::from_secs(2);
    let result = ClientBuilder::new()
        .address(server.addr.to_string())
        .dtls_settings(settings)
        .connect(handler)
        .await;
    assert!(matches!(result, Err(ZipError::Handshake(_))));

    server.shutdown().await
}

#[tokio::test]
async fn test_stop_ends_idle_listener() -> anyhow::Result<()> {
    let server = Server::start(Security::Udp).await?;
    server.shutdown().await
}
