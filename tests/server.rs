use std::{net::SocketAddr, time::Duration};

use anyhow::{Result, anyhow};
use chat_relay::{
    hub::Hub,
    server::Server,
    session::{Liveness, OUTBOUND_QUEUE},
    wire::{Frame, read_frame, write_frame},
};
use tokio::{
    net::{
        TcpListener, TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    sync::oneshot,
    task::JoinHandle,
    time::{Instant, timeout},
};

type Reader = tokio::io::BufReader<OwnedReadHalf>;

const FAST_LIVENESS: Liveness = Liveness {
    read_window: Duration::from_millis(300),
    probe_interval: Duration::from_millis(100),
    write_timeout: Duration::from_millis(200),
};

#[tokio::test]
async fn broadcast_reaches_every_client_including_the_sender() -> Result<()> {
    let (addr, shutdown_tx, server) = start_server(Liveness::default(), OUTBOUND_QUEUE).await?;

    // Joining in sequence, each client waiting for its own echo, guarantees
    // every earlier client is registered before the next message dispatches.
    let (mut a_reader, mut a_writer) = connect(addr).await?;
    announce(&mut a_reader, &mut a_writer, "a").await?;

    let (mut b_reader, mut b_writer) = connect(addr).await?;
    announce(&mut b_reader, &mut b_writer, "b").await?;
    assert_eq!(next_text(&mut a_reader).await?, "b|join");

    let (mut c_reader, mut c_writer) = connect(addr).await?;
    announce(&mut c_reader, &mut c_writer, "c").await?;
    assert_eq!(next_text(&mut a_reader).await?, "c|join");
    assert_eq!(next_text(&mut b_reader).await?, "c|join");

    send_text(&mut a_writer, "a|hi").await?;

    // The hub does not self-filter: a hears its own message too.
    assert_eq!(next_text(&mut a_reader).await?, "a|hi");
    assert_eq!(next_text(&mut b_reader).await?, "a|hi");
    assert_eq!(next_text(&mut c_reader).await?, "a|hi");

    drop((a_writer, b_writer, c_writer));
    let _ = shutdown_tx.send(());
    let _ = server.await;
    Ok(())
}

#[tokio::test]
async fn silent_client_is_closed_within_the_read_window() -> Result<()> {
    let (addr, shutdown_tx, server) = start_server(FAST_LIVENESS, OUTBOUND_QUEUE).await?;

    let (mut reader, _writer) = connect(addr).await?;
    let started = Instant::now();
    let mut saw_probe = false;

    // Never write, never acknowledge: the hub's read deadline expires and
    // the session tears the connection down.
    loop {
        match timeout(Duration::from_secs(2), read_frame(&mut reader)).await {
            Ok(Ok(Some(Frame::Ping))) => saw_probe = true,
            Ok(Ok(Some(Frame::Close))) | Ok(Ok(None)) | Ok(Err(_)) => break,
            Ok(Ok(Some(other))) => return Err(anyhow!("unexpected frame: {other:?}")),
            Err(_) => return Err(anyhow!("server never closed the silent connection")),
        }
    }

    assert!(saw_probe, "expected at least one liveness probe");
    assert!(
        started.elapsed() < Duration::from_millis(1500),
        "teardown took {:?}, expected read window plus slack",
        started.elapsed()
    );

    let _ = shutdown_tx.send(());
    let _ = server.await;
    Ok(())
}

#[tokio::test]
async fn acknowledged_probes_keep_an_idle_client_alive() -> Result<()> {
    let (addr, shutdown_tx, server) = start_server(FAST_LIVENESS, OUTBOUND_QUEUE).await?;

    let (mut reader, mut writer) = connect(addr).await?;

    // Stay otherwise silent for several read windows, answering every probe.
    let quiet_until = Instant::now() + Duration::from_millis(800);
    while Instant::now() < quiet_until {
        match timeout(Duration::from_millis(100), read_frame(&mut reader)).await {
            Ok(Ok(Some(Frame::Ping))) => write_frame(&mut writer, &Frame::Pong).await?,
            Ok(Ok(Some(Frame::Close))) | Ok(Ok(None)) => {
                return Err(anyhow!("client was reaped despite acknowledging probes"));
            }
            Ok(Ok(Some(other))) => return Err(anyhow!("unexpected frame: {other:?}")),
            Ok(Err(err)) => return Err(err.into()),
            Err(_) => continue,
        }
    }

    // Still registered: a broadcast round-trips.
    send_text(&mut writer, "d|still here").await?;
    assert_eq!(next_text(&mut reader).await?, "d|still here");

    let _ = shutdown_tx.send(());
    let _ = server.await;
    Ok(())
}

#[tokio::test]
async fn stalled_reader_is_evicted_and_stops_producing() -> Result<()> {
    let liveness = Liveness {
        read_window: Duration::from_secs(5),
        probe_interval: Duration::from_secs(2),
        write_timeout: Duration::from_millis(500),
    };
    let (addr, shutdown_tx, server) = start_server(liveness, 4).await?;

    let (mut a_reader, mut a_writer) = connect(addr).await?;
    announce(&mut a_reader, &mut a_writer, "a").await?;

    let (mut b_reader, mut b_writer) = connect(addr).await?;
    announce(&mut b_reader, &mut b_writer, "b").await?;
    assert_eq!(next_text(&mut a_reader).await?, "b|join");

    let (mut d_reader, mut d_writer) = connect(addr).await?;
    announce(&mut d_reader, &mut d_writer, "d").await?;
    // From here on d never reads again; its socket stays open.
    assert_eq!(next_text(&mut a_reader).await?, "d|join");
    assert_eq!(next_text(&mut b_reader).await?, "d|join");

    // Large payloads fill d's socket buffers, its outbound task stalls on
    // the write, and its queue (capacity 4) overflows during the burst.
    // Pacing each message on b's receipt keeps a and b well inside their
    // own queues, so only d falls behind.
    let filler = "x".repeat(512 * 1024);
    for n in 0..24 {
        let payload = format!("a|burst-{n}-{filler}");
        send_text(&mut a_writer, &payload).await?;
        assert_eq!(next_text(&mut b_reader).await?, payload);
        assert_eq!(next_text(&mut a_reader).await?, payload);
    }

    // Let the evicted session finish tearing down, then have d try to keep
    // talking. A torn-down client must no longer reach anyone.
    tokio::time::sleep(Duration::from_secs(2)).await;
    for _ in 0..3 {
        let _ = send_text(&mut d_writer, "d|zombie").await;
    }
    tokio::time::sleep(Duration::from_millis(200)).await;

    send_text(&mut a_writer, "a|done").await?;
    assert_eq!(next_text(&mut b_reader).await?, "a|done");
    assert_eq!(next_text(&mut a_reader).await?, "a|done");

    drop((a_writer, b_writer, d_writer));
    let _ = shutdown_tx.send(());
    let _ = server.await;
    Ok(())
}

#[tokio::test]
async fn shutdown_notice_is_a_system_message() -> Result<()> {
    let (addr, shutdown_tx, server) = start_server(Liveness::default(), OUTBOUND_QUEUE).await?;

    let (mut reader, mut writer) = connect(addr).await?;
    announce(&mut reader, &mut writer, "a").await?;

    let _ = shutdown_tx.send(());

    // The shutdown broadcast carries no sender delimiter, which is how
    // system notices are marked for the presentation layer.
    assert_eq!(next_text(&mut reader).await?, "server shutting down");

    let _ = server.await;
    Ok(())
}

async fn start_server(
    liveness: Liveness,
    outbound_capacity: usize,
) -> Result<(SocketAddr, oneshot::Sender<()>, JoinHandle<()>)> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;

    let (hub, handle) = Hub::new();
    tokio::spawn(hub.run());

    let server = Server::new(listener, handle)
        .with_liveness(liveness)
        .with_outbound_capacity(outbound_capacity);
    let addr = server.local_addr()?;

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let task = tokio::spawn(async move {
        let shutdown = async move {
            let _ = shutdown_rx.await;
        };
        let _ = server.run_until(shutdown).await;
    });

    Ok((addr, shutdown_tx, task))
}

async fn connect(addr: SocketAddr) -> Result<(Reader, OwnedWriteHalf)> {
    let stream = TcpStream::connect(addr).await?;
    let (reader, writer) = stream.into_split();
    Ok((tokio::io::BufReader::new(reader), writer))
}

/// Sends a join message and waits for its self-echo, which proves the hub
/// has this client in the registry.
async fn announce(reader: &mut Reader, writer: &mut OwnedWriteHalf, who: &str) -> Result<()> {
    let payload = format!("{who}|join");
    send_text(writer, &payload).await?;
    let echoed = next_text(reader).await?;
    assert_eq!(echoed, payload);
    Ok(())
}

async fn send_text(writer: &mut OwnedWriteHalf, payload: &str) -> Result<()> {
    write_frame(
        writer,
        &Frame::Text {
            payload: payload.to_string(),
        },
    )
    .await?;
    Ok(())
}

/// Reads the next text frame, skipping liveness traffic.
async fn next_text(reader: &mut Reader) -> Result<String> {
    loop {
        let frame = timeout(Duration::from_secs(5), read_frame(reader))
            .await
            .map_err(|_| anyhow!("timed out waiting for a text frame"))??;
        match frame {
            Some(Frame::Text { payload }) => return Ok(payload),
            Some(Frame::Ping) | Some(Frame::Pong) => continue,
            Some(Frame::Close) | None => return Err(anyhow!("connection closed unexpectedly")),
        }
    }
}
