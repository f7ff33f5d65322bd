//! Process Boundary Bridge
//!
//! Connects the real process boundary to in-process ports. The control
//! channel is newline-delimited JSON on stdin/stdout. A control message that
//! names an `endpoint` (a `host:port` the host is listening on) makes the
//! sidecar connect to it; that connection becomes the session's port and
//! carries newline-delimited JSON envelopes.

use log::{debug, error, info, warn};
use serde::Serialize;
use serde_json::Value;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use super::parent::{HostEvent, HostHandle};
use super::port::MessagePort;

/// Control message key naming a session endpoint
pub const ENDPOINT_KEY: &str = "endpoint";

/// Upper bound on connecting to a session endpoint
const ENDPOINT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// One read from a newline-delimited JSON stream
enum LineRead {
    Message(Value),
    /// Blank or unparseable line, already logged
    Skipped,
    /// End of input or a read error, already logged
    End,
}

/// Read the next line as raw bytes and parse it as JSON. Bad input only
/// skips that line; the stream ends on EOF or an I/O error.
async fn read_message<R>(reader: &mut R, buf: &mut Vec<u8>, source: &str) -> LineRead
where
    R: AsyncBufRead + Unpin,
{
    buf.clear();
    match reader.read_until(b'\n', buf).await {
        Ok(0) => LineRead::End,
        Ok(_) => {
            if buf.iter().all(u8::is_ascii_whitespace) {
                return LineRead::Skipped;
            }
            match serde_json::from_slice(buf) {
                Ok(message) => LineRead::Message(message),
                Err(e) => {
                    warn!("Ignoring unparseable {} message: {}", source, e);
                    LineRead::Skipped
                }
            }
        }
        Err(e) => {
            error!("Failed to read {} input: {}", source, e);
            LineRead::End
        }
    }
}

/// Bridge the host handle to this process's stdin and stdout
pub async fn bridge_stdio(host: HostHandle) {
    bridge_control(tokio::io::stdin(), tokio::io::stdout(), host).await
}

/// Bridge the host handle to an arbitrary line-oriented reader and writer.
/// Returns once the reader is exhausted and every signal has been written.
pub async fn bridge_control<R, W>(reader: R, mut writer: W, host: HostHandle)
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (events, mut signals) = host.split();

    let writer_task = tokio::spawn(async move {
        while let Some(signal) = signals.recv().await {
            if let Err(e) = write_line(&mut writer, &signal).await {
                error!("Failed to write control signal: {}", e);
                break;
            }
        }
    });

    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        let data = match read_message(&mut reader, &mut buf, "control").await {
            LineRead::Message(data) => data,
            LineRead::Skipped => continue,
            LineRead::End => {
                info!("Control input closed");
                break;
            }
        };

        let event = match data.get(ENDPOINT_KEY).and_then(Value::as_str) {
            Some(endpoint) => match connect_endpoint(endpoint).await {
                Ok(port) => HostEvent::with_port(data, port),
                Err(e) => {
                    error!("Failed to connect session endpoint {}: {}", endpoint, e);
                    continue;
                }
            },
            None => HostEvent::new(data),
        };

        if events.send(event).is_err() {
            warn!("Control listener gone, stopping control bridge");
            break;
        }
    }

    drop(events);
    if let Err(e) = writer_task.await {
        error!("Control writer task failed: {}", e);
    }
}

/// Connect to a session endpoint and expose it as a port
pub async fn connect_endpoint(endpoint: &str) -> io::Result<MessagePort> {
    connect_endpoint_within(endpoint, ENDPOINT_CONNECT_TIMEOUT).await
}

async fn connect_endpoint_within(endpoint: &str, limit: Duration) -> io::Result<MessagePort> {
    let stream = tokio::time::timeout(limit, TcpStream::connect(endpoint))
        .await
        .map_err(|_| {
            io::Error::new(
                io::ErrorKind::TimedOut,
                format!("connect timed out after {:?}", limit),
            )
        })??;
    info!("Connected session endpoint {}", endpoint);

    let (sidecar_end, bridge_end) = MessagePort::pair();
    tokio::spawn(bridge_stream(stream, bridge_end));
    Ok(sidecar_end)
}

/// Pump newline-delimited JSON between a byte stream and a port until both
/// directions are finished
pub async fn bridge_stream<S>(stream: S, port: MessagePort)
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (read_half, mut write_half) = tokio::io::split(stream);
    let (sender, mut receiver) = port.split();

    let inbound = tokio::spawn(async move {
        let mut reader = BufReader::new(read_half);
        let mut buf = Vec::new();
        loop {
            match read_message(&mut reader, &mut buf, "session").await {
                LineRead::Message(message) => {
                    if sender.post(&message).is_err() {
                        debug!("Session port closed, dropping inbound message");
                        break;
                    }
                }
                LineRead::Skipped => continue,
                LineRead::End => {
                    debug!("Session stream input ended");
                    break;
                }
            }
        }
    });

    while let Some(message) = receiver.recv().await {
        if let Err(e) = write_line(&mut write_half, &message).await {
            error!("Failed to write session message: {}", e);
            break;
        }
    }

    if let Err(e) = write_half.shutdown().await {
        debug!("Session stream shutdown: {}", e);
    }
    inbound.abort();
}

async fn write_line<W, T>(writer: &mut W, message: &T) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize + ?Sized,
{
    let mut bytes = serde_json::to_vec(message)?;
    bytes.push(b'\n');
    writer.write_all(&bytes).await?;
    writer.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::parent::parent_channel;
    use serde_json::json;

    #[tokio::test]
    async fn test_bridge_stream_moves_lines_both_ways() {
        let (client, server) = tokio::io::duplex(1024);
        let (mut sidecar_end, bridge_end) = MessagePort::pair();
        tokio::spawn(bridge_stream(server, bridge_end));

        let (client_read, mut client_write) = tokio::io::split(client);
        client_write
            .write_all(b"{\"id\":\"r1\",\"name\":\"app/ping\"}\n")
            .await
            .unwrap();

        let received = sidecar_end.recv().await.unwrap();
        assert_eq!(received, json!({"id": "r1", "name": "app/ping"}));

        sidecar_end.post(&json!({"id": "r1", "type": "reply"})).unwrap();
        let mut lines = BufReader::new(client_read).lines();
        let line = lines.next_line().await.unwrap().unwrap();
        assert_eq!(serde_json::from_str::<Value>(&line).unwrap(), json!({"id": "r1", "type": "reply"}));

        drop(sidecar_end);
        assert!(lines.next_line().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_bridge_stream_skips_invalid_bytes() {
        let (client, server) = tokio::io::duplex(1024);
        let (mut sidecar_end, bridge_end) = MessagePort::pair();
        tokio::spawn(bridge_stream(server, bridge_end));

        let (_client_read, mut client_write) = tokio::io::split(client);
        client_write
            .write_all(b"\xff\n{\"id\":\"r2\",\"name\":\"x\"}\n")
            .await
            .unwrap();

        let received = tokio::time::timeout(Duration::from_secs(5), sidecar_end.recv())
            .await
            .unwrap();
        assert_eq!(received, Some(json!({"id": "r2", "name": "x"})));
    }

    #[tokio::test]
    async fn test_bridge_control_survives_invalid_bytes() {
        let (mut parent, host) = parent_channel();
        let (input, mut input_writer) = tokio::io::duplex(1024);
        let (_output_reader, output) = tokio::io::duplex(1024);
        tokio::spawn(bridge_control(input, output, host));

        input_writer
            .write_all(b"\xff\xfe garbage\n{\"type\":\"close\",\"sId\":\"s1\"}\n")
            .await
            .unwrap();

        let event = tokio::time::timeout(Duration::from_secs(5), parent.events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.data, json!({"type": "close", "sId": "s1"}));
    }

    #[tokio::test]
    async fn test_connect_endpoint_is_bounded() {
        // Non-routable address: either refused quickly or cut off by the limit
        let started = std::time::Instant::now();
        let result = connect_endpoint_within("10.255.255.1:9", Duration::from_millis(100)).await;
        assert!(result.is_err());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_bridge_control_forwards_events_and_signals() {
        let (mut parent, host) = parent_channel();
        let (input, mut input_writer) = tokio::io::duplex(1024);
        let (output_reader, output) = tokio::io::duplex(1024);

        let bridge = tokio::spawn(bridge_control(input, output, host));

        input_writer
            .write_all(b"not json\n\n{\"type\":\"close\",\"sId\":\"s1\"}\n")
            .await
            .unwrap();

        let event = parent.events.recv().await.unwrap();
        assert_eq!(event.data, json!({"type": "close", "sId": "s1"}));
        assert!(event.port.is_none());

        parent.outbound.post(&json!({"type": "ready"})).unwrap();
        let mut lines = BufReader::new(output_reader).lines();
        let line = lines.next_line().await.unwrap().unwrap();
        assert_eq!(serde_json::from_str::<Value>(&line).unwrap(), json!({"type": "ready"}));

        drop(input_writer);
        assert!(parent.events.recv().await.is_none());
        drop(parent);
        bridge.await.unwrap();
    }
}
