// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::sync::Arc;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use dlq_monitor::{
    config::MonitorConfig,
    logger::Formatter,
    pipeline::Pipeline,
    sink::{HttpSink, LogSink, ReportingSink},
    source::UdpEventSource,
};

#[tokio::main]
pub async fn main() {
    let config = match MonitorConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("DLQ_MONITOR | ERROR | {e}");
            return;
        }
    };

    let env_filter = format!("h2=off,hyper=off,rustls=off,{}", config.log_level);
    let filter = match EnvFilter::try_new(env_filter) {
        Ok(filter) => filter,
        Err(e) => {
            eprintln!("DLQ_MONITOR | ERROR | could not parse log level in configuration: {e}");
            return;
        }
    };
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(filter)
        .event_format(Formatter)
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("DLQ_MONITOR | ERROR | setting default subscriber failed: {e}");
        return;
    }

    debug!("Logging subsystem enabled");

    let sink: Arc<dyn ReportingSink> = match config.http_sink() {
        Some(sink_config) => {
            info!("Publishing snapshots to {}", sink_config.url);
            match HttpSink::new(sink_config) {
                Ok(sink) => Arc::new(sink),
                Err(e) => {
                    error!("Error creating snapshot sink: {e}");
                    return;
                }
            }
        }
        None => {
            info!("DLQ_MONITOR_SINK_URL not set, snapshots will only be logged");
            Arc::new(LogSink)
        }
    };

    let source = match UdpEventSource::bind(&config.host, config.port).await {
        Ok(source) => source,
        Err(e) => {
            error!(
                "Failed to bind event listener on {}:{}: {e}",
                config.host, config.port
            );
            return;
        }
    };

    let pipeline = match Pipeline::new(config) {
        Ok(pipeline) => pipeline,
        Err(e) => {
            error!("{e}");
            return;
        }
    };
    let handle = pipeline.start(source, sink);

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!("Failed to listen for shutdown signal: {e}");
            }
            info!("Shutdown signal received");
            handle.stop();
            handle.stopped().await;
        }
        () = handle.stopped() => {}
    }
}
