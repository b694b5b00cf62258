/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::net::SocketAddr;
use std::time::Duration;

use clap::{Arg, ArgAction, Command, value_parser};

const ARG_LISTEN: &str = "listen";
const ARG_HEADER_TIMEOUT: &str = "header-timeout";
const ARG_MAX_V1_HEADER_SIZE: &str = "max-v1-header-size";
const ARG_STRICT_HEADER: &str = "strict-header";
const ARG_IDLE_TIMEOUT: &str = "idle-timeout";
const ARG_STATS_INTERVAL: &str = "stats-interval";

#[derive(Clone)]
pub struct ProcArgs {
    pub listen_addr: SocketAddr,
    pub header_timeout: Duration,
    pub max_v1_header_size: usize,
    pub strict_header: bool,
    pub idle_timeout: Duration,
    pub stats_interval: Duration,
}

pub fn parse_clap() -> anyhow::Result<ProcArgs> {
    let args = Command::new("p3echo")
        .arg(
            Arg::new(ARG_LISTEN)
                .help("Listen address")
                .long(ARG_LISTEN)
                .short('l')
                .num_args(1)
                .default_value("0.0.0.0:32623")
                .value_parser(value_parser!(SocketAddr)),
        )
        .arg(
            Arg::new(ARG_HEADER_TIMEOUT)
                .help("PROXY protocol header read timeout, in milliseconds")
                .long(ARG_HEADER_TIMEOUT)
                .num_args(1)
                .default_value("1000")
                .value_parser(value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_MAX_V1_HEADER_SIZE)
                .help("Max size of a PROXY protocol v1 header line")
                .long(ARG_MAX_V1_HEADER_SIZE)
                .num_args(1)
                .default_value("107")
                .value_parser(value_parser!(usize)),
        )
        .arg(
            Arg::new(ARG_STRICT_HEADER)
                .help("Close connections that send a malformed PROXY protocol header")
                .long(ARG_STRICT_HEADER)
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new(ARG_IDLE_TIMEOUT)
                .help("Session idle timeout, in seconds")
                .long(ARG_IDLE_TIMEOUT)
                .num_args(1)
                .default_value("30")
                .value_parser(value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_STATS_INTERVAL)
                .help("Statistics report interval, in seconds")
                .long(ARG_STATS_INTERVAL)
                .num_args(1)
                .default_value("60")
                .value_parser(value_parser!(u64).range(1..)),
        )
        .get_matches();

    Ok(ProcArgs {
        listen_addr: *args.get_one::<SocketAddr>(ARG_LISTEN).unwrap(),
        header_timeout: Duration::from_millis(*args.get_one::<u64>(ARG_HEADER_TIMEOUT).unwrap()),
        max_v1_header_size: *args.get_one::<usize>(ARG_MAX_V1_HEADER_SIZE).unwrap(),
        strict_header: args.get_flag(ARG_STRICT_HEADER),
        idle_timeout: Duration::from_secs(*args.get_one::<u64>(ARG_IDLE_TIMEOUT).unwrap()),
        stats_interval: Duration::from_secs(*args.get_one::<u64>(ARG_STATS_INTERVAL).unwrap()),
    })
}
