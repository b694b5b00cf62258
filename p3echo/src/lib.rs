/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use log::{info, warn};
use tokio::net::TcpListener;
use tokio::sync::broadcast;

pub mod opts;
use opts::ProcArgs;

mod serve;
mod signal;
mod stat;

use serve::ListenRuntime;
use stat::{ClientStats, ListenStats};

const DRAIN_WAIT_MAX: Duration = Duration::from_secs(10);

pub async fn run(proc_args: &ProcArgs) -> anyhow::Result<()> {
    let listen_stats = Arc::new(ListenStats::new());
    let client_stats = Arc::new(ClientStats::new());

    let (quit_sender, _) = broadcast::channel(4);
    signal::register_quit(quit_sender.clone())?;

    let report_listen = listen_stats.clone();
    let report_clients = client_stats.clone();
    let report_interval = proc_args.stats_interval;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(report_interval);
        interval.tick().await; // the first tick fires at once
        loop {
            interval.tick().await;
            stat::emit_report(&report_listen, &report_clients);
        }
    });

    let listener = TcpListener::bind(proc_args.listen_addr)
        .await
        .context(format!("failed to listen on {}", proc_args.listen_addr))?;
    info!("listening on {}", proc_args.listen_addr);

    let runtime = ListenRuntime::new(proc_args, listen_stats.clone(), client_stats.clone());
    runtime.run(listener, quit_sender.subscribe()).await;

    drain_sessions(&listen_stats).await;
    stat::emit_report(&listen_stats, &client_stats);
    Ok(())
}

async fn drain_sessions(listen_stats: &ListenStats) {
    let deadline = tokio::time::Instant::now() + DRAIN_WAIT_MAX;
    while listen_stats.alive_count() > 0 {
        if tokio::time::Instant::now() >= deadline {
            warn!(
                "giving up on {} still active sessions",
                listen_stats.alive_count()
            );
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}
