use bytes::Buf;
use bytes::Bytes;
use bytes::BytesMut;
use tokio::io::AsyncRead;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWrite;
use tokio::io::AsyncWriteExt;

use crate::topic::Envelope;

pub const MAX_FRAME_LEN: usize = 1024 * 1024;

#[derive(Debug)]
pub struct FrameReader<R> {
    inner: R,
    buf: BytesMut,
    max_frame_len: usize,
}

impl<R> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(8 * 1024),
            max_frame_len: MAX_FRAME_LEN,
        }
    }

    #[cfg(test)]
    pub fn max_frame_len(mut self, max: usize) -> Self {
        self.max_frame_len = max.max(1);
        self
    }
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    /// Read one frame with a `u32` big-endian length prefix.
    ///
    /// Returns `Ok(None)` on clean EOF with no buffered data.
    pub async fn read_frame(&mut self) -> std::io::Result<Option<Bytes>> {
        loop {
            if self.buf.len() >= 4 {
                let len = u32::from_be_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]])
                    as usize;
                if len > self.max_frame_len {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::InvalidData,
                        "frame too large",
                    ));
                }

                if self.buf.len() >= 4 + len {
                    self.buf.advance(4);
                    let payload = self.buf.split_to(len).freeze();
                    return Ok(Some(payload));
                }
            }

            let n = self.inner.read_buf(&mut self.buf).await?;
            if n == 0 {
                if self.buf.is_empty() {
                    return Ok(None);
                }
                return Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "eof while reading frame",
                ));
            }
        }
    }

    /// Read one frame and decode it as a JSON envelope.
    ///
    /// A frame that is not valid JSON yields `Ok(Some(Err(_)))` so the caller can log it and
    /// keep reading; only transport failures end the stream.
    pub async fn read_envelope(
        &mut self,
    ) -> std::io::Result<Option<Result<Envelope, serde_json::Error>>> {
        let Some(frame) = self.read_frame().await? else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_slice::<Envelope>(&frame)))
    }
}

#[derive(Debug)]
pub struct FrameWriter<W> {
    inner: W,
}

impl<W> FrameWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub async fn write_frame(&mut self, payload: &[u8]) -> std::io::Result<()> {
        let len_u32: u32 = payload
            .len()
            .try_into()
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidData, "frame too big"))?;

        self.inner.write_all(&len_u32.to_be_bytes()).await?;
        if !payload.is_empty() {
            self.inner.write_all(payload).await?;
        }
        Ok(())
    }

    pub async fn write_envelope(&mut self, env: &Envelope) -> std::io::Result<()> {
        let body = serde_json::to_vec(env)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        self.write_frame(&body).await
    }

    pub async fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush().await
    }
}
