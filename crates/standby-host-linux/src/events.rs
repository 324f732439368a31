//! System events as JSON lines
//!
//! The host side (udev rules, a telephony bridge, a shell) writes one
//! `SystemEvent` per line, e.g. `{"event":"screen_status","on":false}`.

use standby_api::SystemEvent;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Parse one line; blank lines and `#` comments yield `None`
pub fn parse_event_line(line: &str) -> Option<Result<SystemEvent, serde_json::Error>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    Some(serde_json::from_str(line))
}

/// Read events from `reader` until EOF, forwarding them on the returned
/// channel. Malformed lines are logged and skipped.
pub fn spawn_event_reader<R>(reader: R) -> mpsc::UnboundedReceiver<SystemEvent>
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let mut lines = reader.lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => match parse_event_line(&line) {
                    Some(Ok(event)) => {
                        debug!(?event, "System event");
                        if tx.send(event).is_err() {
                            break;
                        }
                    }
                    Some(Err(e)) => warn!(error = %e, line = %line, "Ignoring malformed event"),
                    None => {}
                },
                Ok(None) => {
                    info!("Event source closed");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "Event source read failed");
                    break;
                }
            }
        }
    });
    rx
}

#[cfg(test)]
mod tests {
    use super::*;
    use standby_util::Uid;

    #[test]
    fn test_parse_lines() {
        assert!(parse_event_line("").is_none());
        assert!(parse_event_line("  # comment").is_none());
        assert_eq!(
            parse_event_line(r#"{"event":"screen_status","on":false}"#)
                .unwrap()
                .unwrap(),
            SystemEvent::ScreenStatus { on: false }
        );
        assert!(parse_event_line("{not json").unwrap().is_err());
    }

    #[tokio::test]
    async fn test_reader_skips_bad_lines() {
        let input = concat!(
            "{\"event\":\"charging_status\",\"charging\":true}\n",
            "garbage\n",
            "\n",
            "{\"event\":\"app_uninstalled\",\"uid\":10010,\"name\":\"mail\"}\n",
        );
        let mut rx = spawn_event_reader(tokio::io::BufReader::new(input.as_bytes()));

        assert_eq!(
            rx.recv().await,
            Some(SystemEvent::ChargingStatus { charging: true })
        );
        assert_eq!(
            rx.recv().await,
            Some(SystemEvent::AppUninstalled {
                uid: Uid::new(10010),
                name: "mail".into()
            })
        );
        assert_eq!(rx.recv().await, None);
    }
}
