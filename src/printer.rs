//! The "dumb" printer: a sequential sink that knows nothing about the
//! peers or their coordination.

use crate::log;
use crate::message::{PrintRequest, PrintResponse};
use crate::PRINT_DELAY_SECS;
use color_print::cformat;
use futures::{SinkExt, StreamExt};
use rand::Rng;
use std::error::Error;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::time::sleep;
use tokio_util::codec::{Framed, LinesCodec};

pub struct Printer {
    jobs_completed: Arc<Mutex<u64>>,
}

impl Printer {
    pub fn new() -> Self {
        Self {
            jobs_completed: Arc::new(Mutex::new(0)),
        }
    }

    pub async fn run(&self, listener: TcpListener) -> Result<(), Box<dyn Error + Send + Sync>> {
        loop {
            let (stream, address) = listener.accept().await?;

            log::info(&cformat!(
                "Accepted a <bold>connection</bold> from {}.",
                address
            ));

            let jobs_completed = self.jobs_completed.clone();
            tokio::spawn(async move {
                if let Err(e) = Self::handle(stream, address, jobs_completed).await {
                    log::error(&format!("{e}"));
                }
            });
        }
    }

    async fn handle(
        stream: TcpStream,
        address: SocketAddr,
        jobs_completed: Arc<Mutex<u64>>,
    ) -> Result<(), Box<dyn Error + Send + Sync>> {
        let mut lines = Framed::new(stream, LinesCodec::new());

        while let Some(Ok(line)) = lines.next().await {
            match PrintRequest::from_json_string(&line) {
                Ok(request) => {
                    log::info(&cformat!(
                        "Job received from CLIENT <bold>{}</bold>.",
                        request.client_id
                    ));

                    // the job mutex is what makes this printer a sequential
                    // sink: the delay runs while it is held, and tokio's
                    // mutex hands it out in FIFO order
                    let job = {
                        let mut jobs_completed = jobs_completed.lock().await;
                        *jobs_completed += 1;

                        println!(
                            "[TS: {}] CLIENT {}: {}",
                            request.lamport_timestamp, request.client_id, request.message
                        );

                        let delay = rand::rng().random_range(PRINT_DELAY_SECS.0..=PRINT_DELAY_SECS.1);
                        sleep(Duration::from_secs_f64(delay)).await;

                        *jobs_completed
                    };

                    log::info(&cformat!(
                        "Job <bold>#{}</bold> done for CLIENT <bold>{}</bold>.",
                        job,
                        request.client_id
                    ));

                    // no clock here: the printer echoes what it was given
                    let response = PrintResponse {
                        success: true,
                        confirmation_message: "ok".to_string(),
                        lamport_timestamp: request.lamport_timestamp,
                    };
                    lines.send(response.to_json_string()?).await?;
                }
                Err(_) => {
                    log::error(&cformat!(
                        "Received a job with <bold>incorrect formatting</bold> from {}.",
                        address
                    ));
                }
            }
        }

        Ok(())
    }
}

impl Default for Printer {
    fn default() -> Self {
        Self::new()
    }
}
