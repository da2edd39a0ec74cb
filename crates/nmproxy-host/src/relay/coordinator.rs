//! Duplex relay coordinator.
//!
//! Runs both direction pumps concurrently. The first direction to stop
//! decides the session outcome; the other is given `drain_timeout` to finish
//! on its own (it usually sees end of stream once its peer's writer is
//! dropped). Past that it is left running rather than cancelled, so a frame
//! it is writing still goes out whole.
//!
//! Dropping the [`DuplexRelay::run`] future before it completes aborts both
//! pumps.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::{AbortHandle, JoinError, JoinHandle};
use tracing::{debug, info, warn};

use nmproxy_core::{RelaySession, TelemetrySink};

use super::direction::run_direction;
use super::types::{
    Direction, DirectionReport, ExitOutcome, RelayContext, RelayLabels, RelayOptions,
    StreamPair, TerminationReason,
};

/// Bidirectional relay between an upstream and a downstream peer.
#[derive(Debug)]
pub struct DuplexRelay {
    ctx: RelayContext,
    labels: RelayLabels,
    drain_timeout: Duration,
}

enum FirstFinished {
    Outbound(Result<DirectionReport, JoinError>),
    Inbound(Result<DirectionReport, JoinError>),
}

/// Aborts the pumps unless disarmed, so a cancelled relay leaves nothing
/// running behind it.
struct PumpGuard {
    pumps: Vec<AbortHandle>,
}

impl PumpGuard {
    fn disarm(mut self) {
        self.pumps.clear();
    }
}

impl Drop for PumpGuard {
    fn drop(&mut self) {
        for pump in &self.pumps {
            pump.abort();
        }
    }
}

impl DuplexRelay {
    pub fn new(
        session: Arc<RelaySession>,
        sink: Arc<dyn TelemetrySink>,
        options: RelayOptions,
    ) -> Self {
        Self {
            ctx: RelayContext {
                session,
                sink,
                max_frame_bytes: options.max_frame_bytes,
            },
            labels: options.labels,
            drain_timeout: options.drain_timeout,
        }
    }

    /// Relay until either direction stops.
    ///
    /// Upstream frames go to the downstream writer and vice versa. If this
    /// future is dropped early, both pumps are aborted.
    pub async fn run<UR, UW, DR, DW>(
        &self,
        upstream: StreamPair<UR, UW>,
        downstream: StreamPair<DR, DW>,
    ) -> ExitOutcome
    where
        UR: AsyncRead + Unpin + Send + 'static,
        UW: AsyncWrite + Unpin + Send + 'static,
        DR: AsyncRead + Unpin + Send + 'static,
        DW: AsyncWrite + Unpin + Send + 'static,
    {
        let outbound = self.labels.upstream_to_downstream();
        let inbound = self.labels.downstream_to_upstream();

        let mut outbound_task = tokio::spawn(run_direction(
            upstream.reader,
            downstream.writer,
            outbound.clone(),
            self.ctx.clone(),
        ));
        let mut inbound_task = tokio::spawn(run_direction(
            downstream.reader,
            upstream.writer,
            inbound.clone(),
            self.ctx.clone(),
        ));
        let guard = PumpGuard {
            pumps: vec![outbound_task.abort_handle(), inbound_task.abort_handle()],
        };

        let finished = tokio::select! {
            result = &mut outbound_task => FirstFinished::Outbound(result),
            result = &mut inbound_task => FirstFinished::Inbound(result),
        };

        let (first, remaining, remaining_direction) = match finished {
            FirstFinished::Outbound(result) => {
                (join_report(result, outbound), inbound_task, inbound)
            }
            FirstFinished::Inbound(result) => {
                (join_report(result, inbound), outbound_task, outbound)
            }
        };

        info!(
            direction = %first.direction,
            reason = %first.reason,
            forwarded = first.forwarded,
            "Relay direction stopped"
        );

        let second = self.drain(remaining, remaining_direction).await;
        guard.disarm();

        ExitOutcome { first, second }
    }

    /// Wait up to `drain_timeout` for the remaining pump.
    ///
    /// On timeout the handle is dropped, which detaches the pump without
    /// cancelling it.
    async fn drain(
        &self,
        handle: JoinHandle<DirectionReport>,
        direction: Direction,
    ) -> Option<DirectionReport> {
        let Ok(result) = tokio::time::timeout(self.drain_timeout, handle).await else {
            debug!(
                %direction,
                timeout_ms = self.drain_timeout.as_millis(),
                "Remaining direction still running, leaving it to finish"
            );
            return None;
        };
        let report = join_report(result, direction);
        debug!(
            direction = %report.direction,
            reason = %report.reason,
            "Remaining direction drained"
        );
        Some(report)
    }
}

fn join_report(
    result: Result<DirectionReport, JoinError>,
    direction: Direction,
) -> DirectionReport {
    match result {
        Ok(report) => report,
        Err(e) => {
            warn!(%direction, error = %e, "Direction task failed");
            DirectionReport {
                direction,
                reason: TerminationReason::Aborted(e.to_string()),
                forwarded: 0,
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use nmproxy_core::framing::Frame;
    use nmproxy_core::telemetry::MemorySink;
    use nmproxy_core::{decode_frame, encode_frame};
    use tokio::io::{AsyncReadExt, AsyncWriteExt, duplex};
    use tokio::time::timeout;

    use super::*;
    use crate::relay::types::RelayError;

    fn relay(sink: &Arc<MemorySink>, drain_ms: u64) -> (DuplexRelay, Arc<RelaySession>) {
        let session = Arc::new(RelaySession::with_identity("proxy-1-1", 1));
        let options = RelayOptions {
            drain_timeout: Duration::from_millis(drain_ms),
            ..RelayOptions::default()
        };
        (DuplexRelay::new(session.clone(), sink.clone(), options), session)
    }

    #[tokio::test]
    async fn upstream_close_ends_session_cleanly() {
        let sink = Arc::new(MemorySink::new());
        let (relay, session) = relay(&sink, 50);

        let (mut ext_side, proxy_up) = duplex(1024);
        let (proxy_down, mut host_side) = duplex(1024);
        let (up_r, up_w) = tokio::io::split(proxy_up);
        let (down_r, down_w) = tokio::io::split(proxy_down);

        let run = tokio::spawn(async move {
            relay
                .run(StreamPair::new(up_r, up_w), StreamPair::new(down_r, down_w))
                .await
        });

        encode_frame(&mut ext_side, &Frame::new(&br#"{"type":"hello"}"#[..]))
            .await
            .unwrap();
        let echoed = decode_frame(&mut host_side).await.unwrap().unwrap();
        assert_eq!(echoed.payload(), br#"{"type":"hello"}"#);

        ext_side.shutdown().await.unwrap();
        // Host sees end of stream once the outbound pump stops.
        assert!(decode_frame(&mut host_side).await.unwrap().is_none());

        let outcome = run.await.unwrap();
        assert!(outcome.is_clean());
        assert_eq!(outcome.first.direction, Direction::new("extension", "host"));
        assert_eq!(outcome.total_forwarded(), 1);
        assert_eq!(session.message_count(), 1);
        // The host side is still open, so the inbound pump is still running.
        assert!(outcome.second.is_none());

        encode_frame(&mut host_side, &Frame::new(&br#"{"type":"late"}"#[..]))
            .await
            .unwrap();
        let late = decode_frame(&mut ext_side).await.unwrap().unwrap();
        assert_eq!(late.payload(), br#"{"type":"late"}"#);
        drop(host_side);
    }

    #[tokio::test]
    async fn frame_in_flight_at_drain_timeout_arrives_whole() {
        let sink = Arc::new(MemorySink::new());
        let (relay, _session) = relay(&sink, 50);

        // A 16 byte pipe towards the extension stalls any larger write.
        let (mut ext_side, proxy_up) = duplex(16);
        let (proxy_down, mut host_side) = duplex(64 * 1024);
        let (up_r, up_w) = tokio::io::split(proxy_up);
        let (down_r, down_w) = tokio::io::split(proxy_down);

        let run = tokio::spawn(async move {
            relay
                .run(StreamPair::new(up_r, up_w), StreamPair::new(down_r, down_w))
                .await
        });

        let payload = vec![b'x'; 1024];
        encode_frame(&mut host_side, &Frame::new(payload.clone()))
            .await
            .unwrap();
        let mut prefix = [0u8; 4];
        ext_side.read_exact(&mut prefix).await.unwrap();
        assert_eq!(u32::from_le_bytes(prefix), 1024);

        // The extension closes while the reply is still being written.
        ext_side.shutdown().await.unwrap();
        let outcome = run.await.unwrap();
        assert_eq!(outcome.first.direction, Direction::new("extension", "host"));
        assert!(outcome.second.is_none());

        let mut rest = vec![0u8; 1024];
        ext_side.read_exact(&mut rest).await.unwrap();
        assert_eq!(rest, payload);
        drop(host_side);
    }

    #[tokio::test]
    async fn dropping_the_run_future_aborts_both_pumps() {
        let sink = Arc::new(MemorySink::new());
        let (relay, session) = relay(&sink, 50);

        let (mut ext_side, proxy_up) = duplex(1024);
        let (proxy_down, mut host_side) = duplex(1024);
        let (up_r, up_w) = tokio::io::split(proxy_up);
        let (down_r, down_w) = tokio::io::split(proxy_down);

        let upstream = StreamPair::new(up_r, up_w);
        let downstream = StreamPair::new(down_r, down_w);
        let run = relay.run(upstream, downstream);
        let cancelled = timeout(Duration::from_millis(20), run).await;
        assert!(cancelled.is_err());

        // Aborted pumps drop their halves, so both peers see end of stream.
        let wait = Duration::from_secs(5);
        let host_end = timeout(wait, decode_frame(&mut host_side)).await;
        assert!(matches!(host_end, Ok(Ok(None))), "outbound pump outlived the relay");
        let ext_end = timeout(wait, decode_frame(&mut ext_side)).await;
        assert!(matches!(ext_end, Ok(Ok(None))), "inbound pump outlived the relay");

        assert_eq!(session.message_count(), 0);
        assert!(sink.events().is_empty());
    }

    #[tokio::test]
    async fn downstream_protocol_error_decides_outcome() {
        let sink = Arc::new(MemorySink::new());
        let (relay, _session) = relay(&sink, 50);

        let (_ext_side, proxy_up) = duplex(1024);
        let (proxy_down, mut host_side) = duplex(1024);
        let (up_r, up_w) = tokio::io::split(proxy_up);
        let (down_r, down_w) = tokio::io::split(proxy_down);

        let run = tokio::spawn(async move {
            relay
                .run(StreamPair::new(up_r, up_w), StreamPair::new(down_r, down_w))
                .await
        });

        // Two bytes of a length prefix, then end of stream.
        host_side.write_all(&[0x10, 0x00]).await.unwrap();
        host_side.shutdown().await.unwrap();

        let outcome = run.await.unwrap();
        assert!(!outcome.is_clean());
        assert_eq!(outcome.first.direction, Direction::new("host", "extension"));
        assert!(matches!(
            outcome.first.reason,
            TerminationReason::ProtocolError(RelayError::Decode { sequence: 1, .. })
        ));
        // The extension never closed its side, so the other pump is left running.
        assert!(outcome.second.is_none());
        assert_eq!(sink.events_of("host_read_error").len(), 1);
    }
}
