//! Bounded capture of demultiplexed container log streams.

use futures_util::stream::BoxStream;
use futures_util::StreamExt;

use super::DockerError;

const DEFAULT_MAX_BYTES: usize = 64 * 1024;

/// A byte buffer with a hard cap. Writes past the cap are discarded and
/// flip the truncated flag.
pub struct LogBuffer {
    max: usize,
    buf: Vec<u8>,
    truncated: bool,
}

impl LogBuffer {
    pub fn new(max: usize) -> Self {
        let max = if max == 0 { DEFAULT_MAX_BYTES } else { max };
        Self {
            max,
            buf: Vec::with_capacity(max.min(4096)),
            truncated: false,
        }
    }

    pub fn write(&mut self, chunk: &[u8]) {
        let remain = self.max - self.buf.len();
        if remain == 0 {
            if !chunk.is_empty() {
                self.truncated = true;
            }
            return;
        }
        if chunk.len() <= remain {
            self.buf.extend_from_slice(chunk);
            return;
        }
        self.buf.extend_from_slice(&chunk[..remain]);
        self.truncated = true;
    }

    pub fn truncated(&self) -> bool {
        self.truncated
    }

    pub fn into_parts(self) -> (Vec<u8>, bool) {
        (self.buf, self.truncated)
    }
}

/// Drain a demuxed log stream into a capped buffer. Stream errors end the
/// capture; whatever was read so far is returned.
pub async fn read_capped(
    mut stream: BoxStream<'_, Result<Vec<u8>, DockerError>>,
    max: usize,
) -> (Vec<u8>, bool) {
    let mut buf = LogBuffer::new(max);
    while let Some(chunk) = stream.next().await {
        match chunk {
            Ok(bytes) => {
                buf.write(&bytes);
                if buf.truncated() {
                    break;
                }
            }
            Err(err) => {
                tracing::debug!(error = %err, "log stream ended early");
                break;
            }
        }
    }
    buf.into_parts()
}
