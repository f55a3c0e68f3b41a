//! Log relay worker
//!
//! Splits process output into lines and copies them into `Log` events, one
//! event per line, until the source ends. Relays never advance or fail a stage;
//! the driver that owns the stage decides that.

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{trace, warn};

use crate::pipeline::EventSink;

/// Blank lines carry no information and only push real output out of the pane
fn is_noise(line: &str) -> bool {
    line.trim_end_matches(['\n', '\r']).trim().is_empty()
}

/// Relay every line received on `lines` until the sender side closes
pub async fn relay_channel(mut lines: mpsc::UnboundedReceiver<String>, sink: EventSink) -> usize {
    let mut relayed = 0;
    while let Some(line) = lines.recv().await {
        if is_noise(&line) {
            continue;
        }
        sink.log(line.trim_end_matches(['\n', '\r']));
        relayed += 1;
    }
    trace!("Relay finished after {} lines", relayed);
    relayed
}

/// Forward lines from `source` into `tx` as they arrive and return a copy
pub async fn pump_lines<R>(source: R, tx: mpsc::UnboundedSender<String>) -> Vec<String>
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(source);
    let mut buf = Vec::new();
    let mut lines = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf)
                    .trim_end_matches(['\n', '\r'])
                    .to_string();
                let _ = tx.send(line.clone());
                lines.push(line);
            }
            Err(e) => {
                warn!("Failed reading command output: {}", e);
                break;
            }
        }
    }
    lines
}

/// Run [`relay_channel`] as its own task
pub fn spawn_channel_relay(
    lines: mpsc::UnboundedReceiver<String>,
    sink: EventSink,
) -> JoinHandle<usize> {
    tokio::spawn(relay_channel(lines, sink))
}
