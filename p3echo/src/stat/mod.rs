/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::net::IpAddr;
use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use log::info;
use rustc_hash::FxHashMap;

use p3_io_ext::haproxy::ProxyProtocolReadError;

#[derive(Default)]
pub(crate) struct ListenStats {
    alive_count: AtomicI32,
    accepted: AtomicU64,
    direct: AtomicU64,
    proxied_v1: AtomicU64,
    proxied_v2: AtomicU64,
    local: AtomicU64,
    bad_header: AtomicU64,
    failed: AtomicU64,
}

impl ListenStats {
    pub(crate) fn new() -> Self {
        Default::default()
    }

    #[must_use]
    pub(crate) fn add_alive(self: &Arc<Self>) -> SessionAliveGuard {
        self.alive_count.fetch_add(1, Ordering::Relaxed);
        SessionAliveGuard(self.clone())
    }

    pub(crate) fn alive_count(&self) -> i32 {
        self.alive_count.load(Ordering::Relaxed)
    }

    pub(crate) fn add_accepted(&self) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add_direct(&self) {
        self.direct.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add_proxied_v1(&self) {
        self.proxied_v1.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add_proxied_v2(&self) {
        self.proxied_v2.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add_local(&self) {
        self.local.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add_bad_header(&self) {
        self.bad_header.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add_by_proxy_protocol_error(&self, e: &ProxyProtocolReadError) {
        if e.is_fatal() {
            self.add_failed();
        } else {
            self.add_bad_header();
        }
    }

    pub(crate) fn snapshot(&self) -> ListenSnapshot {
        ListenSnapshot {
            accepted: self.accepted.load(Ordering::Relaxed),
            direct: self.direct.load(Ordering::Relaxed),
            proxied_v1: self.proxied_v1.load(Ordering::Relaxed),
            proxied_v2: self.proxied_v2.load(Ordering::Relaxed),
            local: self.local.load(Ordering::Relaxed),
            bad_header: self.bad_header.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

pub(crate) struct SessionAliveGuard(Arc<ListenStats>);

impl Drop for SessionAliveGuard {
    fn drop(&mut self) {
        self.0.alive_count.fetch_sub(1, Ordering::Relaxed);
    }
}

#[derive(Default)]
pub(crate) struct ListenSnapshot {
    pub(crate) accepted: u64,
    pub(crate) direct: u64,
    pub(crate) proxied_v1: u64,
    pub(crate) proxied_v2: u64,
    pub(crate) local: u64,
    pub(crate) bad_header: u64,
    pub(crate) failed: u64,
}

/// Connection counters keyed by the resolved client address. Sessions on
/// all worker threads update this concurrently, so the map stays behind a
/// lock; the counters themselves need no finer granularity.
pub(crate) struct ClientStats {
    conns: Mutex<FxHashMap<IpAddr, u64>>,
}

impl ClientStats {
    pub(crate) fn new() -> Self {
        ClientStats {
            conns: Mutex::new(FxHashMap::default()),
        }
    }

    pub(crate) fn add_connection(&self, ip: IpAddr) {
        let mut map = self.conns.lock().unwrap_or_else(|p| p.into_inner());
        *map.entry(ip).or_insert(0) += 1;
    }

    pub(crate) fn snapshot(&self) -> Vec<(IpAddr, u64)> {
        let map = self.conns.lock().unwrap_or_else(|p| p.into_inner());
        let mut all: Vec<(IpAddr, u64)> = map.iter().map(|(ip, n)| (*ip, *n)).collect();
        all.sort_unstable_by(|a, b| b.1.cmp(&a.1));
        all
    }
}

const REPORT_TOP_CLIENTS: usize = 10;

pub(crate) fn emit_report(listen: &ListenStats, clients: &ClientStats) {
    let s = listen.snapshot();
    info!(
        "accepted {} / direct {} / v1 {} / v2 {} / local {} / bad header {} / failed {}",
        s.accepted, s.direct, s.proxied_v1, s.proxied_v2, s.local, s.bad_header, s.failed
    );
    for (ip, count) in clients.snapshot().into_iter().take(REPORT_TOP_CLIENTS) {
        info!("  client {ip}: {count} connections");
    }
}
