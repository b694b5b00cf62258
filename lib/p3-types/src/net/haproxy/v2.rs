/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::net::SocketAddr;

use super::ProxyProtocolEncodeError;

const V2_MAGIC_HEADER: &[u8] = b"\x0d\x0a\x0d\x0a\x00\x0d\x0a\x51\x55\x49\x54\x0a";

const V2_BUF_CAP: usize = 536;
const V2_HDR_LEN: usize = 16;

const BITS_VERSION: u8 = 0x20;

const CMD_LOCAL: u8 = 0x00;
const CMD_PROXY: u8 = 0x01;

const AF_UNSPEC: u8 = 0x00;
const AF_INET: u8 = 0x10;
const AF_INET6: u8 = 0x20;

const PROTO_UNSPEC: u8 = 0x00;
const PROTO_STREAM: u8 = 0x01;

pub struct ProxyProtocolV2Encoder {
    buf: [u8; V2_BUF_CAP],
    len: usize,
}

impl ProxyProtocolV2Encoder {
    pub(super) fn new() -> Self {
        let mut buf = [0u8; V2_BUF_CAP];
        buf[..12].copy_from_slice(V2_MAGIC_HEADER);
        ProxyProtocolV2Encoder {
            buf,
            len: V2_HDR_LEN,
        }
    }

    pub fn new_tcp(
        client_addr: SocketAddr,
        server_addr: SocketAddr,
    ) -> Result<Self, ProxyProtocolEncodeError> {
        let mut encoder = ProxyProtocolV2Encoder::new();
        encoder.encode_tcp(client_addr, server_addr)?;
        Ok(encoder)
    }

    /// A LOCAL header, as sent by health checking peers. It carries no
    /// address block unless TLV data gets pushed afterwards.
    pub fn new_local() -> Self {
        let mut encoder = ProxyProtocolV2Encoder::new();
        encoder.buf[12] = BITS_VERSION | CMD_LOCAL;
        encoder.buf[13] = AF_UNSPEC | PROTO_UNSPEC;
        encoder
    }

    pub(super) fn encode_tcp(
        &mut self,
        client_addr: SocketAddr,
        server_addr: SocketAddr,
    ) -> Result<&[u8], ProxyProtocolEncodeError> {
        self.buf[12] = BITS_VERSION | CMD_PROXY;
        match (client_addr, server_addr) {
            (SocketAddr::V4(c4), SocketAddr::V4(s4)) => {
                self.buf[13] = AF_INET | PROTO_STREAM;
                self.buf[14..16].copy_from_slice(&12u16.to_be_bytes());
                self.buf[16..20].copy_from_slice(&c4.ip().octets());
                self.buf[20..24].copy_from_slice(&s4.ip().octets());
                self.buf[24..26].copy_from_slice(&c4.port().to_be_bytes());
                self.buf[26..28].copy_from_slice(&s4.port().to_be_bytes());
                self.len = V2_HDR_LEN + 12;
            }
            (SocketAddr::V6(c6), SocketAddr::V6(s6)) => {
                self.buf[13] = AF_INET6 | PROTO_STREAM;
                self.buf[14..16].copy_from_slice(&36u16.to_be_bytes());
                self.buf[16..32].copy_from_slice(&c6.ip().octets());
                self.buf[32..48].copy_from_slice(&s6.ip().octets());
                self.buf[48..50].copy_from_slice(&c6.port().to_be_bytes());
                self.buf[50..52].copy_from_slice(&s6.port().to_be_bytes());
                self.len = V2_HDR_LEN + 36;
            }
            _ => return Err(ProxyProtocolEncodeError::AddressFamilyNotMatch),
        }
        Ok(&self.buf[..self.len])
    }

    pub fn push_tlv(&mut self, key: u8, value: &[u8]) -> Result<(), ProxyProtocolEncodeError> {
        let v_len = value.len();
        let len = u16::try_from(v_len).map_err(ProxyProtocolEncodeError::InvalidU16Length)?;
        let offset = self.len;
        if offset + 3 + v_len > V2_BUF_CAP {
            return Err(ProxyProtocolEncodeError::TotalLengthOverflow);
        }
        self.buf[offset] = key;
        self.buf[offset + 1..offset + 3].copy_from_slice(&len.to_be_bytes());
        self.buf[offset + 3..offset + 3 + v_len].copy_from_slice(value);
        self.len = offset + 3 + v_len;
        Ok(())
    }

    pub fn finalize(&mut self) -> &[u8] {
        let data_len = (self.len - V2_HDR_LEN) as u16; // always fits, see push_tlv
        self.buf[14..16].copy_from_slice(&data_len.to_be_bytes());
        &self.buf[..self.len]
    }
}
