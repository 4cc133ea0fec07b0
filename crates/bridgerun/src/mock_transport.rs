//! In-process host for testing.
//!
//! `pair()` returns a transport for the link plus a `MockHost` that plays the
//! host's side of the protocol from an ordinary (non-async) test thread.

use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use bridgerpc::CallLine;
use bridgerpc::Reply;
use bridgerpc::decode_call;
use bridgerpc::encode_reply;
use bridgerpc::frame::EXIT_FUNCTION;
use tokio::sync::Mutex;
use tokio::sync::mpsc as tokio_mpsc;

use crate::transport;
use crate::transport::Transport;

/// The script's end of an in-process channel pair.
pub struct ChannelTransport {
    to_host: mpsc::Sender<String>,
    from_host: Mutex<tokio_mpsc::UnboundedReceiver<String>>,
}

/// The host's end of an in-process channel pair.
pub struct MockHost {
    to_script: tokio_mpsc::UnboundedSender<String>,
    from_script: mpsc::Receiver<String>,
}

/// Creates a connected transport and mock host.
pub fn pair() -> (ChannelTransport, MockHost) {
    let (to_host, from_script) = mpsc::channel();
    let (to_script, from_host) = tokio_mpsc::unbounded_channel();
    let transport = ChannelTransport {
        to_host,
        from_host: Mutex::new(from_host),
    };
    let host = MockHost { to_script, from_script };
    (transport, host)
}

#[async_trait::async_trait]
impl Transport for ChannelTransport {
    async fn send_line(&self, line: &str) -> transport::Result<()> {
        self.to_host
            .send(line.to_string())
            .map_err(|_| transport::Error::ConnectionLost("Host channel closed".into()))
    }

    async fn recv_line(&self) -> transport::Result<Option<String>> {
        let mut rx = self.from_host.lock().await;
        Ok(rx.recv().await)
    }
}

impl MockHost {
    /// Waits for the next raw line the script wrote.
    pub fn recv_raw(&self, timeout: Duration) -> Option<String> {
        self.from_script.recv_timeout(timeout).ok()
    }

    /// Waits for the next call the script issued. Undecodable lines are skipped.
    pub fn recv_call(&self, timeout: Duration) -> Option<CallLine> {
        loop {
            let line = self.recv_raw(timeout)?;
            match decode_call(&line) {
                Ok(call) => return Some(call),
                Err(e) => tracing::warn!("mock host skipped line: {}", e),
            }
        }
    }

    /// Writes a reply line to the script. Returns false if the script hung up.
    pub fn reply(&self, reply: Reply) -> bool {
        match encode_reply(&reply) {
            Ok(line) => self.send_raw(line.trim_end()),
            Err(e) => {
                tracing::warn!("mock host could not encode reply: {}", e);
                false
            }
        }
    }

    /// Writes an arbitrary line to the script, well-formed or not.
    pub fn send_raw(&self, line: &str) -> bool {
        self.to_script.send(line.to_string()).is_ok()
    }

    /// Acknowledges an `exit!` request.
    pub fn ack_exit(&self) -> bool {
        self.reply(Reply::value(0, EXIT_FUNCTION))
    }

    /// Answers calls on a background thread until the script hangs up or asks to
    /// exit. `exit!` is acknowledged automatically.
    pub fn serve<F>(self, mut handler: F) -> thread::JoinHandle<()>
    where
        F: FnMut(&CallLine) -> Vec<Reply> + Send + 'static,
    {
        thread::spawn(move || {
            loop {
                let line = match self.from_script.recv() {
                    Ok(line) => line,
                    Err(_) => return,
                };
                let Ok(call) = decode_call(&line) else { continue };
                if call.function == EXIT_FUNCTION {
                    self.ack_exit();
                    return;
                }
                for reply in handler(&call) {
                    if !self.reply(reply) {
                        return;
                    }
                }
            }
        })
    }
}
