/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use bytes::BytesMut;
use thiserror::Error;
use tokio::io::AsyncRead;

mod recv;
use recv::{FillError, HeaderRecvBuf};

mod v1;
mod v2;

const PROXY_V2_MAGIC: &[u8] = b"\x0d\x0a\x0d\x0a\x00\x0d\x0a\x51\x55\x49\x54\x0a";
const PROXY_V1_MAGIC: &[u8] = b"PROXY ";

const V1_MAX_HEADER_SIZE: usize = 107;

/// The client and server addresses reported by a PROXY protocol header.
/// Families outside of IPv4/IPv6, including UNKNOWN and unix sockets, carry
/// no usable address and are represented as the absence of this value.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ProxyAddr {
    pub src_addr: SocketAddr,
    pub dst_addr: SocketAddr,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum V2Command {
    Local,
    Proxy,
}

/// Outcome of one header detection pass. The `data` fields hold bytes that
/// were read from the socket but do not belong to the header; together with
/// the consumed header they account for every byte read, nothing is dropped
/// or duplicated. A v1 header never buffers past its line terminator.
#[derive(Debug)]
pub enum ProxyHeader {
    None {
        data: BytesMut,
    },
    V1 {
        addr: Option<ProxyAddr>,
    },
    V2 {
        command: V2Command,
        addr: Option<ProxyAddr>,
        data: BytesMut,
    },
}

impl ProxyHeader {
    pub fn proxy_addr(&self) -> Option<ProxyAddr> {
        match self {
            ProxyHeader::None { .. } => None,
            ProxyHeader::V1 { addr } => *addr,
            ProxyHeader::V2 { addr, .. } => *addr,
        }
    }

    pub fn into_leftover(self) -> BytesMut {
        match self {
            ProxyHeader::None { data } => data,
            ProxyHeader::V1 { .. } => BytesMut::new(),
            ProxyHeader::V2 { data, .. } => data,
        }
    }
}

#[derive(Debug, Error)]
pub enum ProxyProtocolReadError {
    #[error("read failed: {0:?}")]
    ReadFailed(#[from] io::Error),
    #[error("header truncated by timeout or close")]
    TruncatedHeader,
    #[error("unsupported version {0}")]
    InvalidVersion(u8),
    #[error("unsupported command {0}")]
    InvalidCommand(u8),
    #[error("invalid data length: {0}")]
    InvalidDataLength(usize),
    #[error("invalid v1 header line")]
    InvalidLine,
    #[error("invalid family {0}")]
    InvalidFamily(u8),
    #[error("invalid source address")]
    InvalidSrcAddr,
    #[error("invalid destination address")]
    InvalidDstAddr,
}

impl ProxyProtocolReadError {
    /// I/O failures end the connection. All other errors describe a
    /// malformed header and the caller may fall back to the transport
    /// level peer address and keep serving.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ProxyProtocolReadError::ReadFailed(_))
    }
}

pub struct ProxyProtocolDetector {
    timeout: Duration,
    max_v1_header_size: usize,
}

impl ProxyProtocolDetector {
    pub fn new(timeout: Duration) -> Self {
        ProxyProtocolDetector {
            timeout,
            max_v1_header_size: V1_MAX_HEADER_SIZE,
        }
    }

    pub fn set_max_v1_header_size(&mut self, max: usize) {
        self.max_v1_header_size = max;
    }

    /// Detect and consume a PROXY protocol header at the start of `reader`.
    ///
    /// One shot per connection: all reads run against a single deadline
    /// fixed on entry, and once a result is produced the caller owns the
    /// stream position. A peer that sends nothing recognizable before the
    /// deadline is not an error, it is a plain client; the bytes captured
    /// so far come back untouched for replay.
    pub async fn detect<R>(&self, reader: &mut R) -> Result<ProxyHeader, ProxyProtocolReadError>
    where
        R: AsyncRead + Unpin,
    {
        let mut rbuf = HeaderRecvBuf::new(self.timeout);
        match rbuf.fill_exact(reader, PROXY_V2_MAGIC.len()).await {
            Ok(()) => {}
            Err(FillError::TimedOut) | Err(FillError::Closed) => {
                return Ok(ProxyHeader::None {
                    data: rbuf.take_all(),
                });
            }
            Err(FillError::Read(e)) => return Err(ProxyProtocolReadError::ReadFailed(e)),
        }

        let is_v2 = rbuf.as_slice() == PROXY_V2_MAGIC;
        let is_v1 = !is_v2 && rbuf.as_slice().starts_with(PROXY_V1_MAGIC);
        if is_v2 {
            v2::read_header(reader, rbuf).await
        } else if is_v1 {
            v1::read_header(reader, rbuf, self.max_v1_header_size).await
        } else {
            Ok(ProxyHeader::None {
                data: rbuf.take_all(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use p3_types::net::{ProxyProtocolEncoder, ProxyProtocolV2Encoder, ProxyProtocolVersion};
    use std::str::FromStr;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    const DETECT_TIMEOUT: Duration = Duration::from_secs(1);

    #[tokio::test]
    async fn t_not_proxied() {
        let input = b"GET / HTTP/1.1\r\nHost: example.net\r\n\r\n";
        let (mut local, mut remote) = tokio::io::duplex(4096);
        local.write_all(input).await.unwrap();
        drop(local);

        let detector = ProxyProtocolDetector::new(DETECT_TIMEOUT);
        let data = match detector.detect(&mut remote).await.unwrap() {
            ProxyHeader::None { data } => data,
            other => panic!("expected no header, got {other:?}"),
        };
        assert_eq!(&data[..], &input[..12]);

        // nothing past the scanned bytes may have left the socket
        let mut rest = Vec::new();
        remote.read_to_end(&mut rest).await.unwrap();
        assert_eq!(&rest[..], &input[12..]);
    }

    #[tokio::test]
    async fn t_not_proxied_short_close() {
        let (mut local, mut remote) = tokio::io::duplex(4096);
        local.write_all(b"EHLO\r\n").await.unwrap();
        drop(local);

        let detector = ProxyProtocolDetector::new(DETECT_TIMEOUT);
        let data = match detector.detect(&mut remote).await.unwrap() {
            ProxyHeader::None { data } => data,
            other => panic!("expected no header, got {other:?}"),
        };
        assert_eq!(&data[..], b"EHLO\r\n");
    }

    #[tokio::test(start_paused = true)]
    async fn t_not_proxied_stalled() {
        let (mut local, mut remote) = tokio::io::duplex(4096);
        local.write_all(b"GET /").await.unwrap();

        let detector = ProxyProtocolDetector::new(DETECT_TIMEOUT);
        let data = match detector.detect(&mut remote).await.unwrap() {
            ProxyHeader::None { data } => data,
            other => panic!("expected no header, got {other:?}"),
        };
        assert_eq!(&data[..], b"GET /");
        drop(local);
    }

    #[tokio::test]
    async fn t_v2_roundtrip_tcp4() {
        let client = SocketAddr::from_str("192.168.0.1:56324").unwrap();
        let server = SocketAddr::from_str("192.168.0.11:443").unwrap();
        let mut encoder = ProxyProtocolV2Encoder::new_tcp(client, server).unwrap();

        let (mut local, mut remote) = tokio::io::duplex(4096);
        local.write_all(encoder.finalize()).await.unwrap();
        drop(local);

        let detector = ProxyProtocolDetector::new(DETECT_TIMEOUT);
        let (command, addr, data) = match detector.detect(&mut remote).await.unwrap() {
            ProxyHeader::V2 {
                command,
                addr,
                data,
            } => (command, addr, data),
            other => panic!("expected v2 header, got {other:?}"),
        };
        assert_eq!(command, V2Command::Proxy);
        let addr = addr.unwrap();
        assert_eq!(addr.src_addr, client);
        assert_eq!(addr.dst_addr, server);
        assert!(data.is_empty());
    }

    #[tokio::test]
    async fn t_v2_roundtrip_tcp6() {
        let client = SocketAddr::from_str("[2001:db8::1]:56324").unwrap();
        let server = SocketAddr::from_str("[2001:db8::11]:443").unwrap();
        let mut encoder = ProxyProtocolV2Encoder::new_tcp(client, server).unwrap();

        let (mut local, mut remote) = tokio::io::duplex(4096);
        local.write_all(encoder.finalize()).await.unwrap();
        drop(local);

        let detector = ProxyProtocolDetector::new(DETECT_TIMEOUT);
        let addr = detector
            .detect(&mut remote)
            .await
            .unwrap()
            .proxy_addr()
            .unwrap();
        assert_eq!(addr.src_addr, client);
        assert_eq!(addr.dst_addr, server);
    }

    #[tokio::test]
    async fn t_v1_roundtrip() {
        let client = SocketAddr::from_str("192.168.0.1:56324").unwrap();
        let server = SocketAddr::from_str("192.168.0.11:443").unwrap();
        let mut encoder = ProxyProtocolEncoder::new(ProxyProtocolVersion::V1);
        let encoded = encoder.encode_tcp(client, server).unwrap();

        let (mut local, mut remote) = tokio::io::duplex(4096);
        local.write_all(encoded).await.unwrap();
        drop(local);

        let detector = ProxyProtocolDetector::new(DETECT_TIMEOUT);
        let addr = match detector.detect(&mut remote).await.unwrap() {
            ProxyHeader::V1 { addr } => addr.unwrap(),
            other => panic!("expected v1 header, got {other:?}"),
        };
        assert_eq!(addr.src_addr, client);
        assert_eq!(addr.dst_addr, server);
    }

    #[tokio::test]
    async fn t_v2_payload_becomes_leftover() {
        let client = SocketAddr::from_str("10.0.0.1:8080").unwrap();
        let server = SocketAddr::from_str("10.0.0.2:80").unwrap();
        let mut encoder = ProxyProtocolV2Encoder::new_tcp(client, server).unwrap();

        let (mut local, mut remote) = tokio::io::duplex(4096);
        local.write_all(encoder.finalize()).await.unwrap();
        local.write_all(b"hello world").await.unwrap();
        drop(local);

        let detector = ProxyProtocolDetector::new(DETECT_TIMEOUT);
        let header = detector.detect(&mut remote).await.unwrap();
        assert_eq!(header.proxy_addr().unwrap().src_addr, client);
        assert_eq!(&header.into_leftover()[..], b"hello world");
    }

    #[tokio::test]
    async fn t_v2_single_byte_reads() {
        let client = SocketAddr::from_str("10.0.0.1:8080").unwrap();
        let server = SocketAddr::from_str("10.0.0.2:80").unwrap();
        let mut encoder = ProxyProtocolV2Encoder::new_tcp(client, server).unwrap();
        let encoded = encoder.finalize().to_vec();

        let mut builder = tokio_test::io::Builder::new();
        for b in &encoded {
            builder.read(std::slice::from_ref(b));
        }
        builder.read(b"hi");
        let mut mock = builder.build();

        let detector = ProxyProtocolDetector::new(DETECT_TIMEOUT);
        let header = detector.detect(&mut mock).await.unwrap();
        assert_eq!(header.proxy_addr().unwrap().src_addr, client);
        // the payload chunk arrived after the header was complete, so it
        // stays in the stream instead of the leftover buffer
        assert!(header.into_leftover().is_empty());

        let mut rest = [0u8; 2];
        mock.read_exact(&mut rest).await.unwrap();
        assert_eq!(&rest, b"hi");
    }

    #[tokio::test]
    async fn t_v2_payload_in_final_chunk() {
        let client = SocketAddr::from_str("10.0.0.1:8080").unwrap();
        let server = SocketAddr::from_str("10.0.0.2:80").unwrap();
        let mut encoder = ProxyProtocolV2Encoder::new_tcp(client, server).unwrap();
        let mut tail = encoder.finalize()[20..].to_vec();
        tail.extend_from_slice(b"hello");
        let head = encoder.finalize()[..20].to_vec();

        let mut mock = tokio_test::io::Builder::new()
            .read(&head)
            .read(&tail)
            .build();

        let detector = ProxyProtocolDetector::new(DETECT_TIMEOUT);
        let header = detector.detect(&mut mock).await.unwrap();
        assert_eq!(header.proxy_addr().unwrap().src_addr, client);
        assert_eq!(&header.into_leftover()[..], b"hello");
    }

    #[tokio::test]
    async fn t_v2_local_consumes_address_block() {
        let mut encoder = ProxyProtocolV2Encoder::new_local();
        encoder.push_tlv(0x04, b"12345").unwrap();

        let (mut local, mut remote) = tokio::io::duplex(4096);
        local.write_all(encoder.finalize()).await.unwrap();
        local.write_all(b"PING\r\n").await.unwrap();
        drop(local);

        let detector = ProxyProtocolDetector::new(DETECT_TIMEOUT);
        let (command, addr, data) = match detector.detect(&mut remote).await.unwrap() {
            ProxyHeader::V2 {
                command,
                addr,
                data,
            } => (command, addr, data),
            other => panic!("expected v2 header, got {other:?}"),
        };
        assert_eq!(command, V2Command::Local);
        assert!(addr.is_none());
        assert_eq!(&data[..], b"PING\r\n");
    }

    fn v2_raw_header(b13: u8, b14: u8, addr_block: &[u8]) -> Vec<u8> {
        let mut buf = PROXY_V2_MAGIC.to_vec();
        buf.push(b13);
        buf.push(b14);
        buf.extend_from_slice(&(addr_block.len() as u16).to_be_bytes());
        buf.extend_from_slice(addr_block);
        buf
    }

    #[tokio::test]
    async fn t_v2_raw_addresses() {
        let block = [10, 0, 0, 1, 10, 0, 0, 2, 0x1F, 0x90, 0x00, 0x50];
        let (mut local, mut remote) = tokio::io::duplex(4096);
        local
            .write_all(&v2_raw_header(0x21, 0x11, &block))
            .await
            .unwrap();
        drop(local);

        let detector = ProxyProtocolDetector::new(DETECT_TIMEOUT);
        let addr = detector
            .detect(&mut remote)
            .await
            .unwrap()
            .proxy_addr()
            .unwrap();
        assert_eq!(addr.src_addr, "10.0.0.1:8080".parse().unwrap());
        assert_eq!(addr.dst_addr, "10.0.0.2:80".parse().unwrap());
    }

    #[tokio::test]
    async fn t_v2_bad_version() {
        let (mut local, mut remote) = tokio::io::duplex(4096);
        local
            .write_all(&v2_raw_header(0x11, 0x11, &[0u8; 12]))
            .await
            .unwrap();
        drop(local);

        let detector = ProxyProtocolDetector::new(DETECT_TIMEOUT);
        let r = detector.detect(&mut remote).await;
        assert!(matches!(r, Err(ProxyProtocolReadError::InvalidVersion(1))));
    }

    #[tokio::test]
    async fn t_v2_bad_command() {
        let (mut local, mut remote) = tokio::io::duplex(4096);
        local
            .write_all(&v2_raw_header(0x22, 0x11, &[0u8; 12]))
            .await
            .unwrap();
        drop(local);

        let detector = ProxyProtocolDetector::new(DETECT_TIMEOUT);
        let r = detector.detect(&mut remote).await;
        assert!(matches!(r, Err(ProxyProtocolReadError::InvalidCommand(2))));
    }

    #[tokio::test]
    async fn t_v2_short_address_block() {
        // length declared too short for AF_INET, the header is consumed but
        // no address is reported
        let (mut local, mut remote) = tokio::io::duplex(4096);
        local
            .write_all(&v2_raw_header(0x21, 0x11, &[10, 0, 0, 1, 10, 0, 0, 2]))
            .await
            .unwrap();
        drop(local);

        let detector = ProxyProtocolDetector::new(DETECT_TIMEOUT);
        let (command, addr) = match detector.detect(&mut remote).await.unwrap() {
            ProxyHeader::V2 { command, addr, .. } => (command, addr),
            other => panic!("expected v2 header, got {other:?}"),
        };
        assert_eq!(command, V2Command::Proxy);
        assert!(addr.is_none());
    }

    #[tokio::test]
    async fn t_v2_truncated_close() {
        let (mut local, mut remote) = tokio::io::duplex(4096);
        let full = v2_raw_header(0x21, 0x11, &[0u8; 12]);
        local.write_all(&full[..20]).await.unwrap();
        drop(local);

        let detector = ProxyProtocolDetector::new(DETECT_TIMEOUT);
        let r = detector.detect(&mut remote).await;
        assert!(matches!(r, Err(ProxyProtocolReadError::TruncatedHeader)));
    }

    #[tokio::test(start_paused = true)]
    async fn t_v2_truncated_stall() {
        let (mut local, mut remote) = tokio::io::duplex(4096);
        let full = v2_raw_header(0x21, 0x11, &[0u8; 12]);
        local.write_all(&full[..20]).await.unwrap();

        let detector = ProxyProtocolDetector::new(DETECT_TIMEOUT);
        let r = detector.detect(&mut remote).await;
        assert!(matches!(r, Err(ProxyProtocolReadError::TruncatedHeader)));
        drop(local);
    }

    #[tokio::test]
    async fn t_v1_no_leftover() {
        let (mut local, mut remote) = tokio::io::duplex(4096);
        local
            .write_all(b"PROXY TCP4 192.168.0.1 192.168.0.2 56324 443\r\nping\r\n")
            .await
            .unwrap();
        drop(local);

        let detector = ProxyProtocolDetector::new(DETECT_TIMEOUT);
        let addr = match detector.detect(&mut remote).await.unwrap() {
            ProxyHeader::V1 { addr } => addr.unwrap(),
            other => panic!("expected v1 header, got {other:?}"),
        };
        assert_eq!(addr.src_addr, "192.168.0.1:56324".parse().unwrap());
        assert_eq!(addr.dst_addr, "192.168.0.2:443".parse().unwrap());

        // the byte right after CRLF starts the next read
        let mut rest = Vec::new();
        remote.read_to_end(&mut rest).await.unwrap();
        assert_eq!(&rest[..], b"ping\r\n");
    }

    #[tokio::test]
    async fn t_v1_unknown() {
        let (mut local, mut remote) = tokio::io::duplex(4096);
        local.write_all(b"PROXY UNKNOWN\r\n").await.unwrap();
        drop(local);

        let detector = ProxyProtocolDetector::new(DETECT_TIMEOUT);
        let addr = match detector.detect(&mut remote).await.unwrap() {
            ProxyHeader::V1 { addr } => addr,
            other => panic!("expected v1 header, got {other:?}"),
        };
        assert!(addr.is_none());
    }

    #[tokio::test]
    async fn t_v1_line_too_long() {
        let mut line = b"PROXY TCP4 ".to_vec();
        line.resize(128, b'1');

        let (mut local, mut remote) = tokio::io::duplex(4096);
        local.write_all(&line).await.unwrap();
        drop(local);

        let detector = ProxyProtocolDetector::new(DETECT_TIMEOUT);
        let r = detector.detect(&mut remote).await;
        assert!(matches!(
            r,
            Err(ProxyProtocolReadError::InvalidDataLength(_))
        ));
    }

    #[tokio::test]
    async fn t_v1_malformed() {
        let (mut local, mut remote) = tokio::io::duplex(4096);
        local
            .write_all(b"PROXY TCP4 x.y 10.0.0.1 1 2\r\n")
            .await
            .unwrap();
        drop(local);

        let detector = ProxyProtocolDetector::new(DETECT_TIMEOUT);
        let r = detector.detect(&mut remote).await;
        assert!(matches!(r, Err(ProxyProtocolReadError::InvalidSrcAddr)));
    }
}
