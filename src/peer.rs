//! Module that implements all the building blocks used to create the peer.

use crate::log;
use crate::message::*;
use crate::mutex::MutexCore;
use crate::{PRINT_TIMEOUT, RPC_TIMEOUT, WORK_PAUSE_SECS};
use color_print::cformat;
use futures::{SinkExt, StreamExt};
use rand::Rng;
use std::collections::HashMap;
use std::error::Error;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::time::{sleep, timeout};
use tokio_util::codec::{Framed, LinesCodec};

/// One reused connection to a remote endpoint, dialed lazily on first use.
/// Every call runs under a deadline; any failure drops the connection so a
/// stale reply can never be read by a later call, and the next call
/// re-dials.
pub struct PeerStub {
    pub address: String,
    connection: Mutex<Option<Framed<TcpStream, LinesCodec>>>,
}

impl PeerStub {
    pub fn new(address: String) -> Self {
        Self {
            address,
            connection: Mutex::new(None),
        }
    }

    async fn call(
        &self,
        line: String,
        deadline: Duration,
    ) -> Result<String, Box<dyn Error + Send + Sync>> {
        let mut connection = self.connection.lock().await;

        let outcome: Result<Result<String, Box<dyn Error + Send + Sync>>, _> =
            timeout(deadline, async {
                if connection.is_none() {
                    let stream = TcpStream::connect(&self.address).await?;
                    *connection = Some(Framed::new(stream, LinesCodec::new()));
                }

                let lines = connection
                    .as_mut()
                    .ok_or("The connection should be open at this point.")?;

                lines.send(line).await?;

                match lines.next().await {
                    Some(Ok(reply)) => Ok(reply),
                    Some(Err(e)) => Err(e.into()),
                    None => Err("The connection closed before a reply arrived.".into()),
                }
            })
            .await;

        match outcome {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(e)) => {
                *connection = None;
                Err(e)
            }
            Err(_) => {
                *connection = None;
                Err("Timed out waiting for a reply.".into())
            }
        }
    }

    pub async fn request_access(
        &self,
        request: &AccessRequest,
    ) -> Result<AccessResponse, Box<dyn Error + Send + Sync>> {
        let line = Coordination::RequestAccess(request.clone()).to_json_string()?;
        let reply = self.call(line, RPC_TIMEOUT).await?;
        AccessResponse::from_json_string(&reply)
    }

    pub async fn release_access(
        &self,
        release: &AccessRelease,
    ) -> Result<(), Box<dyn Error + Send + Sync>> {
        let line = Coordination::ReleaseAccess(release.clone()).to_json_string()?;
        let reply = self.call(line, RPC_TIMEOUT).await?;
        Empty::from_json_string(&reply)?;
        Ok(())
    }

    pub async fn send_to_printer(
        &self,
        request: &PrintRequest,
    ) -> Result<PrintResponse, Box<dyn Error + Send + Sync>> {
        let line = request.to_json_string()?;
        let reply = self.call(line, PRINT_TIMEOUT).await?;
        PrintResponse::from_json_string(&reply)
    }
}

pub struct Peer {
    pub id: i32,
    pub core: Arc<MutexCore>,
    printer: Arc<PeerStub>,
    stubs: HashMap<String, Arc<PeerStub>>,
}

impl Peer {
    pub fn new(id: i32, printer_address: String, peer_addresses: Vec<String>) -> Self {
        let stubs = peer_addresses
            .iter()
            .map(|address| (address.clone(), Arc::new(PeerStub::new(address.clone()))))
            .collect();

        Self {
            id,
            core: Arc::new(MutexCore::new(id, peer_addresses)),
            printer: Arc::new(PeerStub::new(printer_address)),
            stubs,
        }
    }

    /// Serve inbound coordination calls. One task per connection, because a
    /// deferred `RequestAccess` parks its handler for as long as the
    /// holder keeps the resource.
    pub async fn serve(
        core: Arc<MutexCore>,
        listener: TcpListener,
    ) -> Result<(), Box<dyn Error + Send + Sync>> {
        loop {
            let (stream, address) = listener.accept().await?;
            let core = core.clone();

            tokio::spawn(async move {
                if let Err(e) = Self::handle_connection(stream, address, core).await {
                    log::error(&format!("{e}"));
                }
            });
        }
    }

    async fn handle_connection(
        stream: TcpStream,
        address: SocketAddr,
        core: Arc<MutexCore>,
    ) -> Result<(), Box<dyn Error + Send + Sync>> {
        let mut lines = Framed::new(stream, LinesCodec::new());

        while let Some(Ok(line)) = lines.next().await {
            match Coordination::from_json_string(&line) {
                Ok(Coordination::RequestAccess(request)) => {
                    let response = core.handle_request(request).await;
                    lines.send(response.to_json_string()?).await?;
                }
                Ok(Coordination::ReleaseAccess(release)) => {
                    core.handle_release(release).await;
                    lines.send(Empty.to_json_string()?).await?;
                }
                Err(_) => {
                    log::error(&cformat!(
                        "Received a message with <bold>incorrect formatting</bold> from {}.",
                        address
                    ));
                }
            }
        }

        Ok(())
    }

    /// Blocking half of a cycle: fan the request out to every peer and wait
    /// until each one granted or timed out.
    pub async fn request_cs(&self) {
        let request = self.core.begin_request().await;

        for stub in self.stubs.values() {
            let core = self.core.clone();
            let stub = stub.clone();
            let request = request.clone();

            tokio::spawn(async move {
                match stub.request_access(&request).await {
                    Ok(response) => {
                        log::info(&cformat!(
                            "Permission received from <bold>{}</bold> (client {}).",
                            stub.address,
                            response.responder_id
                        ));
                        core.record_reply(&stub.address, response.lamport_timestamp)
                            .await;
                    }
                    Err(e) => {
                        log::warn(&cformat!(
                            "Peer <bold>{}</bold> is unreachable, counting it as granted: {}",
                            stub.address,
                            e
                        ));
                        core.record_unreachable(&stub.address).await;
                    }
                }
            });
        }

        self.core.await_replies().await;
        self.core.enter_critical().await;
    }

    /// Non-blocking half of a cycle: wake the deferred requesters, then
    /// notify every peer in the background. The notifications are advisory,
    /// so their failures are only logged.
    pub async fn release_cs(&self) {
        let release = self.core.release().await;

        for stub in self.stubs.values() {
            let stub = stub.clone();
            let release = release.clone();

            tokio::spawn(async move {
                if let Err(e) = stub.release_access(&release).await {
                    log::warn(&cformat!(
                        "Couldn't notify <bold>{}</bold> of the release: {}",
                        stub.address,
                        e
                    ));
                }
            });
        }
    }

    /// Send one job to the printer. Only called while the core is HELD.
    pub async fn print(
        &self,
        message: &str,
    ) -> Result<PrintResponse, Box<dyn Error + Send + Sync>> {
        let request = PrintRequest {
            client_id: self.id,
            message: message.to_string(),
            lamport_timestamp: self.core.clock.tick().await,
        };

        log::info(&cformat!(
            "Sending to the printer: <bold>'{}'</bold> (TS: {}).",
            request.message,
            request.lamport_timestamp
        ));

        let response = self.printer.send_to_printer(&request).await?;
        self.core.clock.observe(response.lamport_timestamp).await;

        log::info(&cformat!(
            "Printer confirmed: <bold>{}</bold>.",
            response.confirmation_message
        ));

        Ok(response)
    }

    /// One full cycle: acquire, print, release. A failed print still
    /// releases the resource; the iteration is just logged as failed.
    pub async fn print_cycle(&self) {
        self.request_cs().await;

        let message = format!(
            "message {} from client {}",
            self.core.request_number().await,
            self.id
        );
        if let Err(e) = self.print(&message).await {
            log::error(&format!("The print request failed: {e}"));
        }

        self.release_cs().await;
    }

    pub async fn run(
        self: Arc<Self>,
        listener: TcpListener,
    ) -> Result<(), Box<dyn Error + Send + Sync>> {
        // the listener is already bound, so requests queue up even before
        // the first accept runs
        let server_thread = {
            let core = self.core.clone();
            tokio::spawn(Self::serve(core, listener))
        };

        let driver_thread = {
            let peer = self.clone();

            tokio::spawn(async move {
                loop {
                    let pause = rand::rng().random_range(WORK_PAUSE_SECS.0..=WORK_PAUSE_SECS.1);
                    log::info(&cformat!("Next print cycle in <bold>{:.2}s</bold>.", pause));
                    sleep(Duration::from_secs_f64(pause)).await;

                    peer.print_cycle().await;
                }
            })
        };

        match tokio::try_join!(server_thread, driver_thread) {
            Ok((server_outcome, ())) => server_outcome,
            Err(e) => Err(e.into()),
        }
    }
}
