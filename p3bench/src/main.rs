/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Context, anyhow};
use clap::{Arg, Command, value_parser};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use p3_types::net::{ProxyProtocolEncoder, ProxyProtocolVersion};

const ARG_TARGET: &str = "target";
const ARG_CONNECT: &str = "connect";
const ARG_CONCURRENCY: &str = "concurrency";
const ARG_PROXY_PROTOCOL: &str = "proxy-protocol";
const ARG_PAYLOAD: &str = "payload";
const ARG_TIMEOUT: &str = "timeout";

struct BenchArgs {
    target: SocketAddr,
    connect: usize,
    concurrency: usize,
    proxy_protocol: Option<ProxyProtocolVersion>,
    payload: Option<String>,
    timeout: Duration,
}

fn parse_clap() -> anyhow::Result<BenchArgs> {
    let args = Command::new("p3bench")
        .arg(
            Arg::new(ARG_TARGET)
                .help("Target address")
                .required(true)
                .num_args(1)
                .value_parser(value_parser!(SocketAddr)),
        )
        .arg(
            Arg::new(ARG_CONNECT)
                .help("Number of connections to open")
                .long(ARG_CONNECT)
                .short('c')
                .num_args(1)
                .default_value("1000")
                .value_parser(value_parser!(usize)),
        )
        .arg(
            Arg::new(ARG_CONCURRENCY)
                .help("Max connections in flight")
                .long(ARG_CONCURRENCY)
                .num_args(1)
                .default_value("128")
                .value_parser(value_parser!(usize)),
        )
        .arg(
            Arg::new(ARG_PROXY_PROTOCOL)
                .help("Send a PROXY protocol header of this version first")
                .long(ARG_PROXY_PROTOCOL)
                .num_args(1)
                .value_parser(value_parser!(ProxyProtocolVersion)),
        )
        .arg(
            Arg::new(ARG_PAYLOAD)
                .help("Send this payload and wait for a response")
                .long(ARG_PAYLOAD)
                .num_args(1),
        )
        .arg(
            Arg::new(ARG_TIMEOUT)
                .help("Per connection timeout, in milliseconds")
                .long(ARG_TIMEOUT)
                .num_args(1)
                .default_value("5000")
                .value_parser(value_parser!(u64)),
        )
        .get_matches();

    Ok(BenchArgs {
        target: *args.get_one::<SocketAddr>(ARG_TARGET).unwrap(),
        connect: *args.get_one::<usize>(ARG_CONNECT).unwrap(),
        concurrency: *args.get_one::<usize>(ARG_CONCURRENCY).unwrap(),
        proxy_protocol: args.get_one::<ProxyProtocolVersion>(ARG_PROXY_PROTOCOL).copied(),
        payload: args.get_one::<String>(ARG_PAYLOAD).cloned(),
        timeout: Duration::from_millis(*args.get_one::<u64>(ARG_TIMEOUT).unwrap()),
    })
}

async fn run_one(args: &BenchArgs) -> anyhow::Result<()> {
    let mut stream = tokio::time::timeout(args.timeout, TcpStream::connect(args.target))
        .await
        .map_err(|_| anyhow!("connect timed out"))?
        .context("connect failed")?;

    if let Some(version) = args.proxy_protocol {
        let client_addr = stream.local_addr().context("no local address")?;
        let mut encoder = ProxyProtocolEncoder::new(version);
        let header = encoder
            .encode_tcp(client_addr, args.target)
            .context("failed to encode proxy protocol header")?;
        stream.write_all(header).await.context("header send failed")?;
    }

    if let Some(payload) = &args.payload {
        stream
            .write_all(payload.as_bytes())
            .await
            .context("payload send failed")?;
        let mut buf = [0u8; 1024];
        let nr = tokio::time::timeout(args.timeout, stream.read(&mut buf))
            .await
            .map_err(|_| anyhow!("response timed out"))?
            .context("response read failed")?;
        if nr == 0 {
            return Err(anyhow!("closed without response"));
        }
    }

    Ok(())
}

async fn run(args: Arc<BenchArgs>) -> anyhow::Result<u64> {
    let failed = Arc::new(AtomicU64::new(0));
    let semaphore = Arc::new(Semaphore::new(args.concurrency));
    let mut set = JoinSet::new();

    for i in 0..args.connect {
        let permit = semaphore
            .clone()
            .acquire_owned()
            .await
            .context("semaphore closed")?;
        let args = args.clone();
        let failed = failed.clone();
        set.spawn(async move {
            let _permit = permit;
            if let Err(e) = run_one(&args).await {
                failed.fetch_add(1, Ordering::Relaxed);
                eprintln!("{i}: {e:#}");
            }
        });
    }

    while set.join_next().await.is_some() {}

    Ok(failed.load(Ordering::Relaxed))
}

fn main() -> anyhow::Result<()> {
    let args = Arc::new(parse_clap()?);

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;

    let begin = Instant::now();
    let connect = args.connect;
    let failed = rt.block_on(run(args))?;
    let spend = begin.elapsed().as_secs_f64();

    println!("connect: {connect}, failed: {failed}, spend: {spend:.3}s");
    Ok(())
}
