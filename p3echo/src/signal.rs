/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use tokio::sync::broadcast;

#[cfg(unix)]
pub(crate) fn register_quit(sender: broadcast::Sender<()>) -> anyhow::Result<()> {
    use std::future::poll_fn;

    use anyhow::anyhow;
    use log::info;
    use tokio::signal::unix::{SignalKind, signal};

    let mut int_sig = signal(SignalKind::interrupt())
        .map_err(|e| anyhow!("failed to create SIGINT listener: {e}"))?;
    let int_sender = sender.clone();
    tokio::spawn(async move {
        if poll_fn(|cx| int_sig.poll_recv(cx)).await.is_some() {
            info!("got quit signal");
            let _ = int_sender.send(());
        }
    });

    let mut term_sig = signal(SignalKind::terminate())
        .map_err(|e| anyhow!("failed to create SIGTERM listener: {e}"))?;
    tokio::spawn(async move {
        if poll_fn(|cx| term_sig.poll_recv(cx)).await.is_some() {
            info!("got offline signal");
            let _ = sender.send(());
        }
    });

    Ok(())
}

#[cfg(not(unix))]
pub(crate) fn register_quit(sender: broadcast::Sender<()>) -> anyhow::Result<()> {
    use log::info;

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("got quit signal");
            let _ = sender.send(());
        }
    });

    Ok(())
}
