use std::{io, time::Duration};

use anyhow::Result;
use tokio::{
    io::{AsyncBufRead, AsyncWriteExt, BufReader},
    net::{TcpStream, tcp::OwnedWriteHalf},
    select,
    sync::mpsc,
    time::{self, MissedTickBehavior, timeout},
};
use tracing::{debug, info};

use crate::{
    hub::HubHandle,
    wire::{Frame, read_frame, write_frame},
};

/// Default capacity of the per-client outbound queue. Overflowing it during
/// a fan-out marks the client a slow consumer and the hub evicts it.
pub const OUTBOUND_QUEUE: usize = 256;

/// Timing knobs for the liveness protocol. The probe interval must stay
/// below the read window, or idle-but-healthy peers get reaped between
/// probes.
#[derive(Debug, Clone, Copy)]
pub struct Liveness {
    /// How long a connection may stay completely silent before its next
    /// read fails.
    pub read_window: Duration,
    /// How often the outbound task probes the peer.
    pub probe_interval: Duration,
    /// Deadline applied to every individual write.
    pub write_timeout: Duration,
}

impl Default for Liveness {
    fn default() -> Self {
        Self {
            read_window: Duration::from_secs(60),
            probe_interval: Duration::from_secs(30),
            write_timeout: Duration::from_secs(10),
        }
    }
}

/// Per-session tuning: liveness timing plus the outbound queue bound.
#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    pub liveness: Liveness,
    pub outbound_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            liveness: Liveness::default(),
            outbound_capacity: OUTBOUND_QUEUE,
        }
    }
}

/// Drives one accepted connection from registration to teardown.
///
/// The calling task becomes the inbound side; the outbound side is spawned.
/// The session ends when either side does: a finished read loop means the
/// peer is gone, a finished outbound task means the hub closed the queue
/// (eviction or write failure) and the client must stop producing
/// broadcasts too. Each path issues exactly one unregister, and dropping
/// the read half on return releases the socket.
pub async fn run(stream: TcpStream, hub: HubHandle, config: SessionConfig) -> Result<()> {
    let peer = stream.peer_addr().ok();
    let (reader, writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    let (outbound_tx, outbound_rx) = mpsc::channel(config.outbound_capacity);
    let id = hub.register(outbound_tx);
    info!(?peer, client = id, "client joined");

    let mut outbound = tokio::spawn(outbound_loop(writer, outbound_rx, config.liveness));

    let result = select! {
        result = inbound_loop(&mut reader, &hub, config.liveness) => {
            hub.unregister(id);
            let _ = (&mut outbound).await;
            result
        }
        _ = &mut outbound => {
            // The hub already dropped this client; the redundant request is
            // a no-op and the read side stops here.
            hub.unregister(id);
            Ok(())
        }
    };

    info!(?peer, client = id, "client left");
    result
}

/// Reads frames until the connection fails, closes, or falls silent for a
/// whole read window. Text frames go to the hub intake; waiting there while
/// the intake is full is the intended throttle on fast producers.
async fn inbound_loop<R>(reader: &mut R, hub: &HubHandle, liveness: Liveness) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        // Wrapping each read in the window means every inbound frame,
        // probe acknowledgements included, renews the deadline.
        let frame = match timeout(liveness.read_window, read_frame(reader)).await {
            Err(_) => {
                debug!("read deadline expired");
                return Ok(());
            }
            Ok(result) => match result? {
                Some(frame) => frame,
                None => return Ok(()),
            },
        };

        match frame {
            Frame::Text { payload } => hub.broadcast(payload).await,
            Frame::Ping | Frame::Pong => {}
            Frame::Close => return Ok(()),
        }
    }
}

/// Drains the outbound queue and keeps the peer probed, every write under a
/// bounded deadline. Exits on write failure or when the hub closes the
/// queue; either way the write half is shut down so the peer sees EOF.
async fn outbound_loop(
    mut writer: OwnedWriteHalf,
    mut outbound: mpsc::Receiver<String>,
    liveness: Liveness,
) {
    let first_probe = time::Instant::now() + liveness.probe_interval;
    let mut probe = time::interval_at(first_probe, liveness.probe_interval);
    probe.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        select! {
            queued = outbound.recv() => match queued {
                Some(payload) => {
                    let frame = Frame::Text { payload };
                    if write_with_deadline(&mut writer, &frame, liveness.write_timeout)
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
                None => {
                    // Queue closed by the hub, whether from disconnect or
                    // eviction: tell the peer and stop.
                    let _ = write_with_deadline(&mut writer, &Frame::Close, liveness.write_timeout)
                        .await;
                    break;
                }
            },
            _ = probe.tick() => {
                if write_with_deadline(&mut writer, &Frame::Ping, liveness.write_timeout)
                    .await
                    .is_err()
                {
                    break;
                }
            }
        }
    }

    if let Err(err) = writer.shutdown().await {
        debug!(?err, "failed to shut down writer cleanly");
    }
}

async fn write_with_deadline(
    writer: &mut OwnedWriteHalf,
    frame: &Frame,
    deadline: Duration,
) -> io::Result<()> {
    match timeout(deadline, write_frame(writer, frame)).await {
        Ok(result) => result,
        Err(_) => Err(io::Error::new(
            io::ErrorKind::TimedOut,
            "write deadline expired",
        )),
    }
}
