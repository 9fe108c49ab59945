//! nalu-relay: forwards H.264 NAL units from an RTSP camera to a NATS
//! subject, one message per unit.

mod cli;
mod config;

use std::process::ExitCode;
use std::thread;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use relay_pipeline::{Pipeline, RelayExit, StopReason};
use relay_source::{NalUnit, UnitSource};
use relay_transport::NatsPublisher;
use tracing::{debug, error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::cli::Cli;
use crate::config::RelayConfig;

/// Exit status for configuration errors.
const EXIT_CONFIG: u8 = 2;

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = match RelayConfig::load(&cli) {
        Ok(config) => config,
        Err(e) => {
            error!("Configuration error: {:#}", e);
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    match run(config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose {
        "nalu_relay=debug,relay_pipeline=debug,relay_transport=debug,relay_source=debug"
    } else {
        "nalu_relay=info,relay_pipeline=info,relay_transport=info,relay_source=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn run(config: RelayConfig) -> Result<()> {
    info!(version = env!("CARGO_PKG_VERSION"), "nalu-relay starting");

    let mut source = config.rtsp_source()?;
    let pipeline = Pipeline::new(config.pipeline_config()).context("Failed to build pipeline")?;

    let publisher = NatsPublisher::connect(&config.nats, config.nats_options())
        .with_context(|| format!("Failed to connect to NATS at {}", config.nats))?;

    let shutdown = pipeline.shutdown_handle();
    ctrlc::set_handler(move || {
        if shutdown.trigger(StopReason::Signal) {
            info!("Signal received, shutting down");
        }
    })
    .context("Failed to install signal handler")?;

    let ingest = pipeline.ingest();
    let source_thread = thread::Builder::new()
        .name("rtsp-source".to_string())
        .spawn(move || {
            let mut sink = |nal: NalUnit| match ingest.enqueue(nal.into_data()) {
                Ok(_) => true,
                Err(e) => {
                    debug!("Pipeline refused unit: {}", e);
                    false
                }
            };
            source.run(&mut sink)
        })
        .context("Failed to start source thread")?;

    match pipeline.run(publisher).context("Relay failed")? {
        RelayExit::Shutdown {
            reason,
            drained,
            discarded,
        } => {
            info!(
                reason = reason.message(),
                drained, discarded, "Relay terminated"
            );
            Ok(())
        }
        RelayExit::SourceClosed => match source_thread.join() {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(anyhow::Error::new(e).context("RTSP source failed")),
            Err(_) => Err(anyhow!("RTSP source thread panicked")),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader, Read, Write};
    use std::net::{TcpListener, TcpStream};
    use std::time::Duration;

    use relay_pipeline::PipelineConfig;
    use relay_transport::{NatsOptions, PublishPolicy, RetryPolicy};

    const INFO: &str = "INFO {\"server_id\":\"test\",\"server_name\":\"test\",\"version\":\"2.10.0\",\"go\":\"go1.21\",\"host\":\"127.0.0.1\",\"port\":4222,\"headers\":true,\"max_payload\":1048576,\"proto\":1}\r\n";

    /// Send INFO, read CONNECT and PING, answer PONG.
    fn handshake(socket: &TcpStream) -> (BufReader<TcpStream>, TcpStream) {
        let mut writer = socket.try_clone().unwrap();
        let mut reader = BufReader::new(socket.try_clone().unwrap());
        writer.write_all(INFO.as_bytes()).unwrap();

        let mut line = String::new();
        reader.read_line(&mut line).unwrap();
        assert!(line.starts_with("CONNECT "));
        line.clear();
        reader.read_line(&mut line).unwrap();
        assert_eq!(line, "PING\r\n");
        writer.write_all(b"PONG\r\n").unwrap();
        (reader, writer)
    }

    #[test]
    fn test_relay_retries_across_bus_reconnect() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let server = thread::spawn(move || {
            let (first, _) = listener.accept().unwrap();
            drop(handshake(&first));
            drop(first);

            // Stay away long enough for publishes to be refused.
            thread::sleep(Duration::from_millis(300));

            let (second, _) = listener.accept().unwrap();
            let (mut reader, mut writer) = handshake(&second);
            let mut payloads = Vec::new();
            while payloads.len() < 3 {
                let mut header = String::new();
                if reader.read_line(&mut header).unwrap() == 0 {
                    break;
                }
                if header == "PING\r\n" {
                    writer.write_all(b"PONG\r\n").unwrap();
                    continue;
                }
                let len: usize = header.trim_end().rsplit(' ').next().unwrap().parse().unwrap();
                let mut body = vec![0u8; len + 2];
                reader.read_exact(&mut body).unwrap();
                body.truncate(len);
                payloads.push(body);
            }
            payloads
        });

        let publisher = NatsPublisher::connect(&addr, NatsOptions::default()).unwrap();
        let pipeline = Pipeline::new(PipelineConfig {
            queue_capacity: 4,
            subject: "area.0.cam.0.0".to_string(),
            publish: PublishPolicy::Retry(RetryPolicy {
                max_attempts: 50,
                base_delay: Duration::from_millis(20),
                max_delay: Duration::from_millis(100),
            }),
            ..Default::default()
        })
        .unwrap();

        let ingest = pipeline.ingest();
        let producer = thread::spawn(move || {
            // Units arrive while the bus is gone.
            thread::sleep(Duration::from_millis(100));
            for i in 1..=3u8 {
                ingest.enqueue(vec![i; 4]).unwrap();
            }
        });

        let exit = pipeline.run(publisher).unwrap();
        producer.join().unwrap();

        assert_eq!(exit, RelayExit::SourceClosed);
        assert_eq!(
            server.join().unwrap(),
            vec![vec![1u8; 4], vec![2u8; 4], vec![3u8; 4]]
        );
    }
}
