//! Box-stream: encrypted, authenticated message framing over a byte stream.
//!
//! Every message is sent as a sealed 34-byte header followed by the sealed
//! body:
//!
//! ```text
//! +------------+-------------------------------+----------------------+
//! | header tag | sealed header (18 B)          | sealed body          |
//! | 16 B       | body len u16 BE ‖ body tag    | body len bytes       |
//! +------------+-------------------------------+----------------------+
//!   nonce n                                      nonce n + 1
//! ```
//!
//! The next message starts at nonce n + 2. A header whose plaintext is
//! 18 zero bytes is the goodbye marker: the sender will not send again.

use std::io;

use ssb_common::ErrorKind;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace};

use crate::primitives::{open_detached, seal_detached, TAG_LEN};
use crate::session::SessionContext;

/// Largest body a single box can carry.
pub const MAX_MESSAGE_LEN: usize = u16::MAX as usize;

/// Size of a sealed header on the wire.
pub const HEADER_LEN: usize = TAG_LEN + HEADER_PLAINTEXT_LEN;

const HEADER_PLAINTEXT_LEN: usize = 2 + TAG_LEN;
const GOODBYE: [u8; HEADER_PLAINTEXT_LEN] = [0; HEADER_PLAINTEXT_LEN];

#[derive(Debug, Error)]
pub enum BoxStreamError {
    #[error("transport error: {0}")]
    Io(#[from] io::Error),

    #[error("stream ended without goodbye")]
    Truncated,

    #[error("message of {0} bytes exceeds the {MAX_MESSAGE_LEN} byte limit")]
    MessageTooLarge(usize),

    #[error("{0} failed authentication")]
    Decrypt(&'static str),

    #[error("failed to seal message")]
    Seal,

    #[error("stream failed earlier and cannot continue")]
    Poisoned,

    #[error("writer already sent goodbye")]
    Closed,
}

impl BoxStreamError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BoxStreamError::Io(_) | BoxStreamError::Truncated => ErrorKind::Network,
            BoxStreamError::Decrypt(_) | BoxStreamError::Seal => ErrorKind::Crypto,
            BoxStreamError::MessageTooLarge(_)
            | BoxStreamError::Poisoned
            | BoxStreamError::Closed => ErrorKind::Protocol,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteState {
    Open,
    Closed,
    Poisoned,
}

/// Sending half of a box-stream.
#[derive(Debug)]
pub struct BoxWriter<W> {
    inner: W,
    session: SessionContext,
    state: WriteState,
}

impl<W> BoxWriter<W> {
    pub fn new(inner: W, session: SessionContext) -> Self {
        Self {
            inner,
            session,
            state: WriteState::Open,
        }
    }

    /// True once the goodbye has been sent.
    pub fn is_closed(&self) -> bool {
        self.state == WriteState::Closed
    }

    /// True after a failed write. The peer's nonce may no longer match ours.
    pub fn is_poisoned(&self) -> bool {
        self.state == WriteState::Poisoned
    }

    /// Seal one message, advancing the nonce by two.
    ///
    /// Returns the complete wire frame.
    fn seal_message(&mut self, body: &[u8]) -> Result<Vec<u8>, BoxStreamError> {
        let len = u16::try_from(body.len())
            .map_err(|_| BoxStreamError::MessageTooLarge(body.len()))?;

        let header_nonce = *self.session.nonce();
        let body_nonce = header_nonce.successor();
        let key = self.session.key();

        let mut frame = vec![0u8; HEADER_LEN + body.len()];
        frame[HEADER_LEN..].copy_from_slice(body);
        let body_tag = seal_detached(key, body_nonce.as_bytes(), &mut frame[HEADER_LEN..])
            .map_err(|_| BoxStreamError::Seal)?;

        let mut header = [0u8; HEADER_PLAINTEXT_LEN];
        header[..2].copy_from_slice(&len.to_be_bytes());
        header[2..].copy_from_slice(&body_tag);
        let header_tag = seal_detached(key, header_nonce.as_bytes(), &mut header)
            .map_err(|_| BoxStreamError::Seal)?;

        frame[..TAG_LEN].copy_from_slice(&header_tag);
        frame[TAG_LEN..HEADER_LEN].copy_from_slice(&header);

        self.session.advance();
        self.session.advance();
        Ok(frame)
    }

    fn seal_goodbye(&self) -> Result<[u8; HEADER_LEN], BoxStreamError> {
        let mut header = GOODBYE;
        let tag = seal_detached(self.session.key(), self.session.nonce().as_bytes(), &mut header)
            .map_err(|_| BoxStreamError::Seal)?;

        let mut frame = [0u8; HEADER_LEN];
        frame[..TAG_LEN].copy_from_slice(&tag);
        frame[TAG_LEN..].copy_from_slice(&header);
        Ok(frame)
    }
}

impl<W: AsyncWrite + Unpin> BoxWriter<W> {
    /// Encrypt and send one message.
    ///
    /// Header and body go out in a single write. Bodies over
    /// [`MAX_MESSAGE_LEN`] fail before the nonce moves; splitting is up to
    /// the caller.
    ///
    /// A transport error leaves an unknown part of the frame on the wire, so
    /// the writer refuses every later send and close with
    /// [`BoxStreamError::Poisoned`].
    pub async fn send(&mut self, body: &[u8]) -> Result<(), BoxStreamError> {
        match self.state {
            WriteState::Closed => return Err(BoxStreamError::Closed),
            WriteState::Poisoned => return Err(BoxStreamError::Poisoned),
            WriteState::Open => {}
        }
        if body.len() > MAX_MESSAGE_LEN {
            return Err(BoxStreamError::MessageTooLarge(body.len()));
        }

        let frame = self.seal_message(body)?;
        if let Err(e) = self.write_frame(&frame).await {
            self.state = WriteState::Poisoned;
            return Err(e.into());
        }
        trace!(len = body.len(), "sent box");
        Ok(())
    }

    /// Send the goodbye marker and shut down the write side.
    ///
    /// Idempotent. Later sends fail with [`BoxStreamError::Closed`].
    pub async fn close(&mut self) -> Result<(), BoxStreamError> {
        match self.state {
            WriteState::Closed => return Ok(()),
            WriteState::Poisoned => return Err(BoxStreamError::Poisoned),
            WriteState::Open => {}
        }
        let goodbye = self.seal_goodbye()?;
        if let Err(e) = self.write_frame(&goodbye).await {
            self.state = WriteState::Poisoned;
            return Err(e.into());
        }
        self.state = WriteState::Closed;
        self.inner.shutdown().await?;
        debug!("sent goodbye");
        Ok(())
    }

    async fn write_frame(&mut self, frame: &[u8]) -> io::Result<()> {
        self.inner.write_all(frame).await?;
        self.inner.flush().await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadState {
    Open,
    Ended,
    Poisoned,
}

/// Receiving half of a box-stream.
#[derive(Debug)]
pub struct BoxReader<R> {
    inner: R,
    session: SessionContext,
    state: ReadState,
}

impl<R> BoxReader<R> {
    pub fn new(inner: R, session: SessionContext) -> Self {
        Self {
            inner,
            session,
            state: ReadState::Open,
        }
    }

    /// True once the peer's goodbye has been received.
    pub fn is_ended(&self) -> bool {
        self.state == ReadState::Ended
    }
}

impl<R: AsyncRead + Unpin> BoxReader<R> {
    /// Receive the next message.
    ///
    /// `Ok(None)` means the peer said goodbye; every later call returns the
    /// same. Any error is final: the reader refuses further reads with
    /// [`BoxStreamError::Poisoned`]. The reader does not own the whole
    /// transport, so after an error the caller must drop both halves to
    /// close the connection.
    pub async fn recv(&mut self) -> Result<Option<Vec<u8>>, BoxStreamError> {
        match self.state {
            ReadState::Ended => return Ok(None),
            ReadState::Poisoned => return Err(BoxStreamError::Poisoned),
            ReadState::Open => {}
        }

        match self.read_message().await {
            Ok(Some(body)) => Ok(Some(body)),
            Ok(None) => {
                debug!("received goodbye");
                self.state = ReadState::Ended;
                Ok(None)
            }
            Err(e) => {
                self.state = ReadState::Poisoned;
                Err(e)
            }
        }
    }

    async fn read_message(&mut self) -> Result<Option<Vec<u8>>, BoxStreamError> {
        let mut sealed = [0u8; HEADER_LEN];
        read_full(&mut self.inner, &mut sealed).await?;

        let mut header_tag = [0u8; TAG_LEN];
        header_tag.copy_from_slice(&sealed[..TAG_LEN]);
        let mut header = [0u8; HEADER_PLAINTEXT_LEN];
        header.copy_from_slice(&sealed[TAG_LEN..]);

        open_detached(
            self.session.key(),
            self.session.nonce().as_bytes(),
            &mut header,
            &header_tag,
        )
        .map_err(|_| BoxStreamError::Decrypt("header"))?;

        if header == GOODBYE {
            return Ok(None);
        }
        self.session.advance();

        let len = usize::from(u16::from_be_bytes([header[0], header[1]]));
        let mut body_tag = [0u8; TAG_LEN];
        body_tag.copy_from_slice(&header[2..]);

        let mut body = vec![0u8; len];
        read_full(&mut self.inner, &mut body).await?;
        open_detached(
            self.session.key(),
            self.session.nonce().as_bytes(),
            &mut body,
            &body_tag,
        )
        .map_err(|_| BoxStreamError::Decrypt("body"))?;
        self.session.advance();

        trace!(len, "received box");
        Ok(Some(body))
    }
}

async fn read_full<R: AsyncRead + Unpin>(reader: &mut R, buf: &mut [u8]) -> Result<(), BoxStreamError> {
    match reader.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(BoxStreamError::Truncated),
        Err(e) => Err(BoxStreamError::Io(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Nonce;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::{duplex, DuplexStream};

    /// Accepts `budget` bytes, then fails every write.
    struct FailingWriter {
        budget: usize,
    }

    impl AsyncWrite for FailingWriter {
        fn poll_write(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            if self.budget == 0 {
                return Poll::Ready(Err(io::ErrorKind::BrokenPipe.into()));
            }
            let n = buf.len().min(self.budget);
            self.budget -= n;
            Poll::Ready(Ok(n))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    fn unhex(s: &str) -> Vec<u8> {
        (0..s.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&s[i..i + 2], 16).unwrap())
            .collect()
    }

    fn session() -> SessionContext {
        SessionContext::new([0x5a; 32], Nonce::from_bytes([0x01; 24]))
    }

    fn pair() -> (BoxWriter<DuplexStream>, BoxReader<DuplexStream>) {
        let (a, b) = duplex(256 * 1024);
        (BoxWriter::new(a, session()), BoxReader::new(b, session()))
    }

    #[tokio::test]
    async fn test_send_recv() {
        let (mut writer, mut reader) = pair();
        writer.send(b"hello").await.unwrap();
        writer.send(&[7u8; 4096]).await.unwrap();

        assert_eq!(reader.recv().await.unwrap().unwrap(), b"hello");
        assert_eq!(reader.recv().await.unwrap().unwrap(), vec![7u8; 4096]);
    }

    #[tokio::test]
    async fn test_nonce_advances_by_two() {
        let (mut writer, _reader) = pair();
        let start = *writer.session.nonce();
        writer.send(b"x").await.unwrap();
        assert_eq!(writer.session.nonce(), &start.successor().successor());
    }

    #[tokio::test]
    async fn test_wire_size() {
        let (a, mut b) = duplex(1024);
        let mut writer = BoxWriter::new(a, session());
        writer.send(b"abc").await.unwrap();
        drop(writer);

        let mut wire = Vec::new();
        b.read_to_end(&mut wire).await.unwrap();
        assert_eq!(wire.len(), HEADER_LEN + 3);
    }

    #[tokio::test]
    async fn test_empty_body_is_not_goodbye() {
        let (mut writer, mut reader) = pair();
        writer.send(b"").await.unwrap();
        writer.send(b"after").await.unwrap();

        assert_eq!(reader.recv().await.unwrap().unwrap(), b"");
        assert_eq!(reader.recv().await.unwrap().unwrap(), b"after");
        assert!(!reader.is_ended());
    }

    #[tokio::test]
    async fn test_goodbye_ends_stream() {
        let (mut writer, mut reader) = pair();
        writer.send(b"last").await.unwrap();
        writer.close().await.unwrap();
        writer.close().await.unwrap();

        assert_eq!(reader.recv().await.unwrap().unwrap(), b"last");
        assert!(reader.recv().await.unwrap().is_none());
        assert!(reader.is_ended());
        assert!(reader.recv().await.unwrap().is_none());

        assert!(matches!(writer.send(b"more").await, Err(BoxStreamError::Closed)));
    }

    #[tokio::test]
    async fn test_tampered_header_poisons_reader() {
        let (a, mut b) = duplex(1024);
        let mut writer = BoxWriter::new(a, session());
        writer.send(b"payload").await.unwrap();
        drop(writer);

        let mut wire = Vec::new();
        b.read_to_end(&mut wire).await.unwrap();
        wire[TAG_LEN + 1] ^= 0x80;

        let mut reader = BoxReader::new(wire.as_slice(), session());
        let err = reader.recv().await.unwrap_err();
        assert!(matches!(err, BoxStreamError::Decrypt("header")));
        assert_eq!(err.kind(), ErrorKind::Crypto);
        assert!(matches!(reader.recv().await, Err(BoxStreamError::Poisoned)));
    }

    #[tokio::test]
    async fn test_tampered_body_rejected() {
        let (a, mut b) = duplex(1024);
        let mut writer = BoxWriter::new(a, session());
        writer.send(b"payload").await.unwrap();
        drop(writer);

        let mut wire = Vec::new();
        b.read_to_end(&mut wire).await.unwrap();
        let last = wire.len() - 1;
        wire[last] ^= 0x01;

        let mut reader = BoxReader::new(wire.as_slice(), session());
        assert!(matches!(
            reader.recv().await,
            Err(BoxStreamError::Decrypt("body"))
        ));
    }

    #[tokio::test]
    async fn test_wrong_key_rejected() {
        let (a, b) = duplex(1024);
        let mut writer = BoxWriter::new(a, session());
        let mut reader = BoxReader::new(
            b,
            SessionContext::new([0x5b; 32], Nonce::from_bytes([0x01; 24])),
        );
        writer.send(b"payload").await.unwrap();
        assert!(matches!(reader.recv().await, Err(BoxStreamError::Decrypt(_))));
    }

    #[tokio::test]
    async fn test_oversized_fails_fast() {
        let (mut writer, mut reader) = pair();
        let start = *writer.session.nonce();

        let err = writer.send(&vec![0u8; MAX_MESSAGE_LEN + 1]).await.unwrap_err();
        assert!(matches!(err, BoxStreamError::MessageTooLarge(65536)));
        assert_eq!(writer.session.nonce(), &start);

        writer.send(&vec![1u8; MAX_MESSAGE_LEN]).await.unwrap();
        assert_eq!(reader.recv().await.unwrap().unwrap().len(), MAX_MESSAGE_LEN);
    }

    #[tokio::test]
    async fn test_eof_without_goodbye_is_truncated() {
        let (mut writer, mut reader) = pair();
        writer.send(b"one").await.unwrap();
        drop(writer);

        assert_eq!(reader.recv().await.unwrap().unwrap(), b"one");
        let err = reader.recv().await.unwrap_err();
        assert!(matches!(err, BoxStreamError::Truncated));
        assert_eq!(err.kind(), ErrorKind::Network);
    }

    #[tokio::test]
    async fn test_eof_mid_body_is_truncated() {
        let (a, mut b) = duplex(1024);
        let mut writer = BoxWriter::new(a, session());
        writer.send(b"a longer payload").await.unwrap();
        drop(writer);

        let mut wire = Vec::new();
        b.read_to_end(&mut wire).await.unwrap();
        wire.truncate(HEADER_LEN + 4);

        let mut reader = BoxReader::new(wire.as_slice(), session());
        assert!(matches!(reader.recv().await, Err(BoxStreamError::Truncated)));
    }

    #[tokio::test]
    async fn test_failed_write_poisons_writer() {
        let mut writer = BoxWriter::new(FailingWriter { budget: 10 }, session());

        let err = writer.send(b"first").await.unwrap_err();
        assert!(matches!(err, BoxStreamError::Io(_)));
        assert_eq!(err.kind(), ErrorKind::Network);
        assert!(writer.is_poisoned());

        assert!(matches!(writer.send(b"second").await, Err(BoxStreamError::Poisoned)));
        assert!(matches!(writer.close().await, Err(BoxStreamError::Poisoned)));
        assert!(!writer.is_closed());
    }

    #[tokio::test]
    async fn test_known_wire_bytes() {
        // Client-to-server session of a reference handshake transcript.
        let key: [u8; 32] = unhex("ee97d7ef7dc9a7e62fab8f6e6c51f2a78279380cf5c1150f97233efb1247397a")
            .try_into()
            .unwrap();
        let nonce: [u8; 24] = unhex("a4a3beba7d14c18dffe09f0c2b2c50c5e3c984d5fdf8e28c")
            .try_into()
            .unwrap();
        let (a, mut b) = duplex(1024);
        let mut writer = BoxWriter::new(a, SessionContext::new(key, Nonce::from_bytes(nonce)));
        writer.send(b"hello").await.unwrap();
        writer.close().await.unwrap();

        let mut wire = Vec::new();
        b.read_to_end(&mut wire).await.unwrap();
        let (message, goodbye) = wire.split_at(HEADER_LEN + 5);
        assert_eq!(
            message,
            unhex(
                "7bfd21a78e86516b672797e055ca5a98a6080794d0ff7fe1ad07a5966475f375\
                 f3150535788a0d"
            )
        );
        assert_eq!(
            goodbye,
            unhex(
                "62bdce1328fb2654a2fc1d02a2356f93849268cad10fdeef01df857281e631d0\
                 8f66"
            )
        );

        let session = SessionContext::new(key, Nonce::from_bytes(nonce));
        let mut reader = BoxReader::new(wire.as_slice(), session);
        assert_eq!(reader.recv().await.unwrap().unwrap(), b"hello");
        assert!(reader.recv().await.unwrap().is_none());
    }
}
