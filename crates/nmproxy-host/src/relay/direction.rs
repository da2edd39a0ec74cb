//! One-way frame pump.
//!
//! Reads frames from a source, records telemetry and writes each frame
//! unchanged to a destination until the source closes or a codec error
//! occurs. The destination is shut down and dropped on return so the peer
//! observes end of stream.

use serde_json::json;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

use nmproxy_core::{decode_frame_limited, encode_frame};

use super::types::{Direction, DirectionReport, RelayContext, RelayError, TerminationReason};

/// Pump frames from `source` to `destination` in order.
///
/// Message ids start at 1 and increase by one per decoded frame. The shared
/// session counter is bumped only after a frame has been fully written.
pub async fn run_direction<R, W>(
    mut source: R,
    mut destination: W,
    direction: Direction,
    ctx: RelayContext,
) -> DirectionReport
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    debug!(%direction, "Direction pump started");

    let mut sequence: u64 = 0;
    let mut forwarded: u64 = 0;

    let reason = loop {
        let next = sequence + 1;
        let frame = match decode_frame_limited(&mut source, ctx.max_frame_bytes).await {
            Ok(Some(frame)) => frame,
            Ok(None) => break TerminationReason::Closed,
            Err(source) => {
                break TerminationReason::ProtocolError(RelayError::Decode {
                    direction: direction.clone(),
                    sequence: next,
                    source,
                });
            }
        };
        sequence = next;

        let message_type = frame.message_type();
        let size = frame.len();
        debug!(%direction, sequence, %message_type, size, "Frame received");
        ctx.sink.log_text(&format!(
            "Message {sequence} from {}: type={message_type}, size={size}",
            direction.from()
        ));
        ctx.sink.log_event(
            &direction.received_event(),
            &ctx.session,
            json!({
                "message_id": sequence,
                "message_type": message_type,
                "message_size": size,
            }),
        );

        if let Err(source) = encode_frame(&mut destination, &frame).await {
            break TerminationReason::ProtocolError(RelayError::Write {
                direction: direction.clone(),
                sequence,
                source,
            });
        }

        ctx.sink.log_event(
            &direction.forwarded_event(),
            &ctx.session,
            json!({ "message_id": sequence }),
        );
        forwarded += 1;
        ctx.session.record_forwarded();
    };

    report_termination(&direction, &reason, forwarded, &ctx);

    if let Err(e) = destination.shutdown().await {
        debug!(%direction, error = %e, "Destination shutdown failed");
    }

    DirectionReport {
        direction,
        reason,
        forwarded,
    }
}

fn report_termination(
    direction: &Direction,
    reason: &TerminationReason,
    forwarded: u64,
    ctx: &RelayContext,
) {
    match reason {
        TerminationReason::Closed => {
            info!(%direction, forwarded, "Source closed");
            ctx.sink.log_text(&format!(
                "{} closed the stream after {forwarded} messages",
                direction.from()
            ));
        }
        TerminationReason::ProtocolError(err @ RelayError::Decode { source, .. }) => {
            warn!(%direction, error = %err, "Read failed");
            ctx.sink
                .log_text(&format!("Error reading from {}: {source}", direction.from()));
            ctx.sink.log_event(
                &direction.read_error_event(),
                &ctx.session,
                json!({
                    "message_id": err.sequence(),
                    "error": source.to_string(),
                    "error_kind": err.kind(),
                }),
            );
        }
        TerminationReason::ProtocolError(err @ RelayError::Write { source, .. }) => {
            warn!(%direction, error = %err, "Write failed");
            ctx.sink
                .log_text(&format!("Error forwarding to {}: {source}", direction.to()));
            ctx.sink.log_event(
                &direction.write_error_event(),
                &ctx.session,
                json!({
                    "message_id": err.sequence(),
                    "error": source.to_string(),
                    "error_kind": err.kind(),
                }),
            );
        }
        TerminationReason::Aborted(why) => {
            warn!(%direction, reason = %why, "Direction aborted");
        }
    }
}
