/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use tokio::io::AsyncRead;

use super::recv::{FillError, HeaderRecvBuf};
use super::{ProxyAddr, ProxyHeader, ProxyProtocolReadError, V2Command};

const V2_FIXED_HEADER_LEN: usize = 16;

// address family in the high nibble, transport protocol in the low one
const FAMILY_TCP4: u8 = 0x11;
const FAMILY_TCP6: u8 = 0x21;

pub(super) async fn read_header<R>(
    reader: &mut R,
    mut rbuf: HeaderRecvBuf,
) -> Result<ProxyHeader, ProxyProtocolReadError>
where
    R: AsyncRead + Unpin,
{
    map_fill(rbuf.fill_exact(reader, V2_FIXED_HEADER_LEN).await)?;

    let hdr = rbuf.as_slice();
    let version = hdr[12] >> 4;
    if version != 2 {
        return Err(ProxyProtocolReadError::InvalidVersion(version));
    }
    let command = match hdr[12] & 0x0F {
        0x00 => V2Command::Local,
        0x01 => V2Command::Proxy,
        c => return Err(ProxyProtocolReadError::InvalidCommand(c)),
    };
    let fam_proto = hdr[13];
    let addr_len = u16::from_be_bytes([hdr[14], hdr[15]]) as usize;
    let header_len = V2_FIXED_HEADER_LEN + addr_len;

    // the declared length is binding for LOCAL as well, the whole address
    // block gets consumed no matter the command
    map_fill(rbuf.fill_at_least(reader, header_len).await)?;

    let addr = match command {
        V2Command::Local => None,
        V2Command::Proxy => {
            parse_addresses(fam_proto, &rbuf.as_slice()[V2_FIXED_HEADER_LEN..header_len])
        }
    };
    let data = rbuf.split_leftover(header_len);
    Ok(ProxyHeader::V2 {
        command,
        addr,
        data,
    })
}

fn map_fill(r: Result<(), FillError>) -> Result<(), ProxyProtocolReadError> {
    match r {
        Ok(()) => Ok(()),
        Err(FillError::TimedOut) | Err(FillError::Closed) => {
            Err(ProxyProtocolReadError::TruncatedHeader)
        }
        Err(FillError::Read(e)) => Err(ProxyProtocolReadError::ReadFailed(e)),
    }
}

// Unknown family/transport combinations and address blocks too short for
// the declared family leave the transport level address in use. The header
// is structurally valid in both cases. TLV data after the addresses is
// skipped, not validated.
fn parse_addresses(fam_proto: u8, block: &[u8]) -> Option<ProxyAddr> {
    match fam_proto {
        FAMILY_TCP4 if block.len() >= 12 => {
            let src_ip = Ipv4Addr::new(block[0], block[1], block[2], block[3]);
            let dst_ip = Ipv4Addr::new(block[4], block[5], block[6], block[7]);
            let src_port = u16::from_be_bytes([block[8], block[9]]);
            let dst_port = u16::from_be_bytes([block[10], block[11]]);
            Some(ProxyAddr {
                src_addr: SocketAddr::new(IpAddr::V4(src_ip), src_port),
                dst_addr: SocketAddr::new(IpAddr::V4(dst_ip), dst_port),
            })
        }
        FAMILY_TCP6 if block.len() >= 36 => {
            let mut octets = [0u8; 16];
            octets.copy_from_slice(&block[0..16]);
            let src_ip = Ipv6Addr::from(octets);
            octets.copy_from_slice(&block[16..32]);
            let dst_ip = Ipv6Addr::from(octets);
            let src_port = u16::from_be_bytes([block[32], block[33]]);
            let dst_port = u16::from_be_bytes([block[34], block[35]]);
            Some(ProxyAddr {
                src_addr: SocketAddr::new(IpAddr::V6(src_ip), src_port),
                dst_addr: SocketAddr::new(IpAddr::V6(dst_ip), dst_port),
            })
        }
        _ => None,
    }
}
