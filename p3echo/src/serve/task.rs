/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::BytesMut;
use log::{debug, info, warn};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use p3_io_ext::RewindStream;
use p3_io_ext::haproxy::{ProxyHeader, ProxyProtocolDetector, V2Command};

use super::ServerConfig;
use crate::stat::{ClientStats, ListenStats};

const ECHO_PREFIX: &[u8] = b"echo: ";
const COPY_BUF_SIZE: usize = 2048;

pub(super) struct EchoTask {
    config: Arc<ServerConfig>,
    listen_stats: Arc<ListenStats>,
    client_stats: Arc<ClientStats>,
    peer_addr: SocketAddr,
    local_addr: SocketAddr,
}

impl EchoTask {
    pub(super) fn new(
        config: Arc<ServerConfig>,
        listen_stats: Arc<ListenStats>,
        client_stats: Arc<ClientStats>,
        peer_addr: SocketAddr,
        local_addr: SocketAddr,
    ) -> Self {
        EchoTask {
            config,
            listen_stats,
            client_stats,
            peer_addr,
            local_addr,
        }
    }

    pub(super) async fn into_running(self, mut stream: TcpStream) {
        let _alive = self.listen_stats.add_alive();

        let mut detector = ProxyProtocolDetector::new(self.config.header_timeout);
        detector.set_max_v1_header_size(self.config.max_v1_header_size);

        let header = match detector.detect(&mut stream).await {
            Ok(header) => header,
            Err(e) => {
                self.listen_stats.add_by_proxy_protocol_error(&e);
                if e.is_fatal() {
                    warn!("{} header detection failed: {e}", self.peer_addr);
                    return;
                }
                if self.config.strict_header {
                    warn!("{} dropped, malformed header: {e}", self.peer_addr);
                    return;
                }
                // permissive mode: the peer address stays in effect, the
                // malformed header bytes are gone for good
                debug!("{} malformed header, using socket address: {e}", self.peer_addr);
                ProxyHeader::None {
                    data: BytesMut::new(),
                }
            }
        };

        let via = match &header {
            ProxyHeader::None { .. } => {
                self.listen_stats.add_direct();
                "direct"
            }
            ProxyHeader::V1 { .. } => {
                self.listen_stats.add_proxied_v1();
                "proxy-v1"
            }
            ProxyHeader::V2 {
                command: V2Command::Local,
                ..
            } => {
                self.listen_stats.add_local();
                "proxy-v2-local"
            }
            ProxyHeader::V2 { .. } => {
                self.listen_stats.add_proxied_v2();
                "proxy-v2"
            }
        };
        let (client_addr, server_addr) = match header.proxy_addr() {
            Some(addr) => (addr.src_addr, addr.dst_addr),
            None => (self.peer_addr, self.local_addr),
        };

        self.client_stats.add_connection(client_addr.ip());
        info!("{} connected via {via}, client {client_addr}", self.peer_addr);

        let leftover = header.into_leftover();
        if !leftover.is_empty() {
            debug!("{} replaying {} buffered bytes", self.peer_addr, leftover.len());
        }
        let stream = RewindStream::new(stream, leftover);
        match self.echo(stream, client_addr, server_addr, via).await {
            Ok(()) => info!("{} closed, client {client_addr}", self.peer_addr),
            Err(e) => debug!("{} session error: {e}", self.peer_addr),
        }
    }

    async fn echo(
        &self,
        mut stream: RewindStream<TcpStream>,
        client_addr: SocketAddr,
        server_addr: SocketAddr,
        via: &str,
    ) -> io::Result<()> {
        let greeting = format!("* {via} client {client_addr} server {server_addr}\r\n");
        stream.write_all(greeting.as_bytes()).await?;

        let mut buf = [0u8; COPY_BUF_SIZE];
        loop {
            let nr = match tokio::time::timeout(self.config.idle_timeout, stream.read(&mut buf))
                .await
            {
                Ok(r) => r?,
                Err(_) => {
                    debug!("{} idle timeout", self.peer_addr);
                    let _ = stream.write_all(b"* idle timeout\r\n").await;
                    return Ok(());
                }
            };
            if nr == 0 {
                return Ok(());
            }
            stream.write_all(ECHO_PREFIX).await?;
            stream.write_all(&buf[..nr]).await?;
        }
    }
}
