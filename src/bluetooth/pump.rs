// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Stream pump: read loop plus write side of a connected stream.

use anyhow::{anyhow, bail, Result};
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, WriteHalf};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::protocol::{Frame, Framing};
use crate::state::Role;

/// Default size of the read buffer.
pub const DEFAULT_READ_BUFFER: usize = 1024;

/// Default pause after a transient read error.
pub const DEFAULT_READ_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Tuning for a stream pump.
#[derive(Debug, Clone)]
pub struct PumpOptions {
    pub framing: Framing,
    pub read_buffer_size: usize,
    pub read_retry_delay: Duration,
}

impl Default for PumpOptions {
    fn default() -> Self {
        Self {
            framing: Framing::Raw,
            read_buffer_size: DEFAULT_READ_BUFFER,
            read_retry_delay: DEFAULT_READ_RETRY_DELAY,
        }
    }
}

/// Delivered from the read loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PumpEvent {
    /// A complete frame arrived.
    Frame(Frame),
    /// The stream ended. Always the last event.
    Closed,
}

/// Cloneable handle to the outbound half of a pump.
pub struct PumpWriter<S> {
    half: Arc<Mutex<Option<WriteHalf<S>>>>,
    stopped: Arc<watch::Sender<bool>>,
    framing: Framing,
}

impl<S> Clone for PumpWriter<S> {
    fn clone(&self) -> Self {
        Self {
            half: self.half.clone(),
            stopped: self.stopped.clone(),
            framing: self.framing,
        }
    }
}

impl<S: AsyncRead + AsyncWrite> PumpWriter<S> {
    /// Encode one frame and write it in a single call.
    ///
    /// A write still blocked when the pump is stopped is abandoned and the
    /// outbound half is closed.
    pub async fn write(&self, content: &str, sender: Role) -> Result<()> {
        let bytes = self.framing.encode(&Frame::new(content, sender))?;
        let mut stop = self.stopped.subscribe();

        let mut guard = self.half.lock().await;
        if *stop.borrow_and_update() {
            bail!("Stream pump stopped");
        }
        let half = guard
            .as_mut()
            .ok_or_else(|| anyhow!("Stream pump stopped"))?;

        let written = tokio::select! {
            result = async {
                half.write_all(&bytes).await?;
                half.flush().await
            } => Some(result),
            _ = stop.wait_for(|stopped| *stopped) => None,
        };

        match written {
            Some(result) => {
                result?;
                debug!("Sent {} bytes", bytes.len());
                Ok(())
            }
            None => {
                guard.take();
                bail!("Stream pump stopped during write")
            }
        }
    }
}

/// Owns a connected stream: a background read loop and a write side.
pub struct StreamPump<S> {
    writer: PumpWriter<S>,
    reader: JoinHandle<()>,
}

impl<S> StreamPump<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    /// Take ownership of `stream` and start reading.
    ///
    /// `on_event` runs on the read task for every decoded frame, then once
    /// with [`PumpEvent::Closed`] when the stream ends. It is not called
    /// after [`StreamPump::stop`].
    pub fn start<F>(stream: S, options: PumpOptions, on_event: F) -> Self
    where
        F: FnMut(PumpEvent) + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let framing = options.framing;
        let reader = tokio::spawn(read_loop(read_half, options, on_event));

        Self {
            writer: PumpWriter {
                half: Arc::new(Mutex::new(Some(write_half))),
                stopped: Arc::new(watch::channel(false).0),
                framing,
            },
            reader,
        }
    }

    pub async fn write(&self, content: &str, sender: Role) -> Result<()> {
        self.writer.write(content, sender).await
    }
}

impl<S> StreamPump<S> {
    pub fn writer(&self) -> PumpWriter<S> {
        self.writer.clone()
    }

    /// Stop reading and close both directions.
    pub fn stop(&self) {
        if self.writer.stopped.send_replace(true) {
            return;
        }
        self.reader.abort();
        // A write in flight holds the lock; it sees the signal and drops the half.
        if let Ok(mut half) = self.writer.half.try_lock() {
            half.take();
        }
        debug!("Stream pump stopped");
    }

    pub fn is_stopped(&self) -> bool {
        *self.writer.stopped.borrow()
    }

    /// The read loop has exited, by stop or by end of stream.
    pub fn is_finished(&self) -> bool {
        self.reader.is_finished()
    }
}

impl<S> Drop for StreamPump<S> {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Errors after which the stream cannot produce more data.
fn is_terminal(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::NotConnected
            | io::ErrorKind::UnexpectedEof
    )
}

async fn read_loop<R, F>(mut reader: R, options: PumpOptions, mut on_event: F)
where
    R: AsyncRead + Unpin,
    F: FnMut(PumpEvent),
{
    let mut buffer = vec![0u8; options.read_buffer_size.max(1)];
    let mut decoder = options.framing.decoder();
    info!("Stream pump started ({:?} framing)", options.framing);

    loop {
        match reader.read(&mut buffer).await {
            Ok(0) => {
                info!("Stream closed by remote");
                break;
            }
            Ok(n) => {
                debug!("Received {} bytes", n);
                for result in decoder.push(&buffer[..n]) {
                    match result {
                        Ok(frame) => on_event(PumpEvent::Frame(frame)),
                        Err(e) => warn!("Dropping malformed frame: {}", e),
                    }
                }
            }
            Err(e) if is_terminal(&e) => {
                warn!("Stream terminated: {}", e);
                break;
            }
            Err(e) => {
                error!("Error on input stream: {}", e);
                tokio::time::sleep(options.read_retry_delay).await;
            }
        }
    }

    on_event(PumpEvent::Closed);
}
