/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::str::FromStr;

use tokio::io::AsyncRead;

use super::recv::{FillError, HeaderRecvBuf};
use super::{PROXY_V1_MAGIC, ProxyAddr, ProxyHeader, ProxyProtocolReadError};

pub(super) async fn read_header<R>(
    reader: &mut R,
    mut rbuf: HeaderRecvBuf,
    max_header_size: usize,
) -> Result<ProxyHeader, ProxyProtocolReadError>
where
    R: AsyncRead + Unpin,
{
    let end = loop {
        if let Some(p) = memchr::memchr(b'\n', rbuf.as_slice()) {
            break p + 1;
        }
        if rbuf.len() >= max_header_size {
            return Err(ProxyProtocolReadError::InvalidDataLength(rbuf.len()));
        }
        // one byte at a time, the line terminator marks the exact end of
        // the header and nothing past it may be consumed
        match rbuf.fill_exact(reader, rbuf.len() + 1).await {
            Ok(()) => {}
            Err(FillError::TimedOut) | Err(FillError::Closed) => {
                return Err(ProxyProtocolReadError::TruncatedHeader);
            }
            Err(FillError::Read(e)) => return Err(ProxyProtocolReadError::ReadFailed(e)),
        }
    };

    let addr = parse_buf(&rbuf.as_slice()[..end])?;
    Ok(ProxyHeader::V1 { addr })
}

fn parse_buf(data: &[u8]) -> Result<Option<ProxyAddr>, ProxyProtocolReadError> {
    let Some(line) = data.strip_suffix(b"\r\n") else {
        return Err(ProxyProtocolReadError::InvalidLine);
    };

    let mut iter = line[PROXY_V1_MAGIC.len()..].split(|c| *c == b' ');
    let family = iter
        .next()
        .ok_or(ProxyProtocolReadError::InvalidFamily(0x00))?;
    let family_c = match family {
        b"TCP4" => b'4',
        b"TCP6" => b'6',
        b"UNKNOWN" => return Ok(None), // trailing addresses are allowed but carry nothing
        _ => {
            return Err(ProxyProtocolReadError::InvalidFamily(
                family.first().copied().unwrap_or(0x00),
            ));
        }
    };

    let src_ip = iter.next().ok_or(ProxyProtocolReadError::InvalidSrcAddr)?;
    let src_ip =
        std::str::from_utf8(src_ip).map_err(|_| ProxyProtocolReadError::InvalidSrcAddr)?;

    let dst_ip = iter.next().ok_or(ProxyProtocolReadError::InvalidDstAddr)?;
    let dst_ip =
        std::str::from_utf8(dst_ip).map_err(|_| ProxyProtocolReadError::InvalidDstAddr)?;

    let src_port = iter.next().ok_or(ProxyProtocolReadError::InvalidSrcAddr)?;
    let src_port =
        std::str::from_utf8(src_port).map_err(|_| ProxyProtocolReadError::InvalidSrcAddr)?;

    let dst_port = iter.next().ok_or(ProxyProtocolReadError::InvalidDstAddr)?;
    let dst_port =
        std::str::from_utf8(dst_port).map_err(|_| ProxyProtocolReadError::InvalidDstAddr)?;

    if iter.next().is_some() {
        return Err(ProxyProtocolReadError::InvalidLine);
    }

    let (src_ip, dst_ip) = match family_c {
        b'4' => {
            let src_addr =
                Ipv4Addr::from_str(src_ip).map_err(|_| ProxyProtocolReadError::InvalidSrcAddr)?;
            let dst_addr =
                Ipv4Addr::from_str(dst_ip).map_err(|_| ProxyProtocolReadError::InvalidDstAddr)?;
            (IpAddr::V4(src_addr), IpAddr::V4(dst_addr))
        }
        b'6' => {
            let src_addr =
                Ipv6Addr::from_str(src_ip).map_err(|_| ProxyProtocolReadError::InvalidSrcAddr)?;
            let dst_addr =
                Ipv6Addr::from_str(dst_ip).map_err(|_| ProxyProtocolReadError::InvalidDstAddr)?;
            (IpAddr::V6(src_addr), IpAddr::V6(dst_addr))
        }
        c => return Err(ProxyProtocolReadError::InvalidFamily(c)),
    };

    let src_port = u16::from_str(src_port).map_err(|_| ProxyProtocolReadError::InvalidSrcAddr)?;
    let dst_port = u16::from_str(dst_port).map_err(|_| ProxyProtocolReadError::InvalidDstAddr)?;

    Ok(Some(ProxyAddr {
        src_addr: SocketAddr::new(src_ip, src_port),
        dst_addr: SocketAddr::new(dst_ip, dst_port),
    }))
}
