use clap::Parser;
use color_print::cformat;
use print_arbiter::{log, printer::Printer};
use std::error::Error;
use tokio::net::TcpListener;

#[derive(Parser)]
#[command(name = "printer")]
#[command(about = "The shared dumb printer. Prints whatever it is sent, one job at a time.")]
struct PrinterOptions {
    /// Port to listen on for print jobs
    #[clap(long, default_value_t = 50051)]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    let options = PrinterOptions::parse();

    let listener = TcpListener::bind(format!("0.0.0.0:{}", options.port)).await?;
    log::info(&cformat!(
        "Printer listening on port <bold>{}</bold>.",
        options.port
    ));

    let printer = Printer::new();

    tokio::select! {
        outcome = printer.run(listener) => outcome,
        _ = tokio::signal::ctrl_c() => {
            log::info("Shutting the printer down.");
            Ok(())
        }
    }
}
