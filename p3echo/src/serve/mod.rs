/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;

use crate::opts::ProcArgs;
use crate::stat::{ClientStats, ListenStats};

mod task;
use task::EchoTask;

pub(crate) struct ServerConfig {
    pub(crate) header_timeout: Duration,
    pub(crate) max_v1_header_size: usize,
    pub(crate) strict_header: bool,
    pub(crate) idle_timeout: Duration,
}

pub(crate) struct ListenRuntime {
    config: Arc<ServerConfig>,
    listen_stats: Arc<ListenStats>,
    client_stats: Arc<ClientStats>,
}

impl ListenRuntime {
    pub(crate) fn new(
        proc_args: &ProcArgs,
        listen_stats: Arc<ListenStats>,
        client_stats: Arc<ClientStats>,
    ) -> Self {
        ListenRuntime {
            config: Arc::new(ServerConfig {
                header_timeout: proc_args.header_timeout,
                max_v1_header_size: proc_args.max_v1_header_size,
                strict_header: proc_args.strict_header,
                idle_timeout: proc_args.idle_timeout,
            }),
            listen_stats,
            client_stats,
        }
    }

    pub(crate) async fn run(
        &self,
        listener: TcpListener,
        mut quit_receiver: broadcast::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                biased;

                _ = quit_receiver.recv() => {
                    info!("listener going offline");
                    break;
                }
                result = listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            self.listen_stats.add_accepted();
                            self.spawn_task(stream, peer_addr);
                        }
                        Err(e) => {
                            // transient resource pressure, keep the listener up
                            self.listen_stats.add_failed();
                            warn!("accept: {e:?}");
                        }
                    }
                }
            }
        }
    }

    fn spawn_task(&self, stream: TcpStream, peer_addr: SocketAddr) {
        let local_addr = match stream.local_addr() {
            Ok(addr) => addr,
            Err(e) => {
                self.listen_stats.add_failed();
                warn!("no local address for connection from {peer_addr}: {e}");
                return;
            }
        };

        let task = EchoTask::new(
            self.config.clone(),
            self.listen_stats.clone(),
            self.client_stats.clone(),
            peer_addr,
            local_addr,
        );
        tokio::spawn(async move { task.into_running(stream).await });
    }
}
