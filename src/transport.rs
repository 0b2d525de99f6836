//! NetBIOS Session Service framing for SMB2 over TCP.
//!
//! Each message is prefixed with a 4-byte big-endian length.
//! The top byte is the message type (0x00 = session message), leaving
//! 24 bits of length.
//!
//! MS-SMB2 Section 2.1: Transport

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Maximum frame size we'll accept (8 MB).
pub const MAX_FRAME_SIZE: u32 = 8 * 1024 * 1024;

/// NetBIOS session message type.
const SESSION_MESSAGE: u8 = 0x00;
/// NetBIOS keep-alive; carries no payload and is skipped.
const SESSION_KEEP_ALIVE: u8 = 0x85;

/// Read a single NetBIOS-framed SMB2 message from the stream.
///
/// A clean end of stream before the first length byte surfaces as
/// `UnexpectedEof`, like any other short read.
pub async fn read_frame<R>(stream: &mut R) -> std::io::Result<Bytes>
where
    R: AsyncRead + Unpin,
{
    loop {
        let mut len_buf = [0u8; 4];
        stream.read_exact(&mut len_buf).await?;

        let kind = len_buf[0];
        let len = u32::from_be_bytes(len_buf) & 0x00FF_FFFF;

        if len > MAX_FRAME_SIZE {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("Frame too large: {} bytes", len),
            ));
        }

        let mut payload = vec![0u8; len as usize];
        stream.read_exact(&mut payload).await?;

        match kind {
            SESSION_MESSAGE => return Ok(Bytes::from(payload)),
            SESSION_KEEP_ALIVE => continue,
            other => {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("Unexpected NetBIOS message type 0x{:02x}", other),
                ))
            }
        }
    }
}

/// Write a single NetBIOS-framed SMB2 message to the stream.
pub async fn write_frame<W>(stream: &mut W, data: &[u8]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    if data.len() > MAX_FRAME_SIZE as usize {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("Frame too large: {} bytes", data.len()),
        ));
    }
    // Type byte 0x00 (session message) is already 0 in the top byte
    let len_bytes = (data.len() as u32).to_be_bytes();
    stream.write_all(&len_bytes).await?;
    stream.write_all(data).await?;
    stream.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::{TcpListener, TcpStream};

    #[tokio::test]
    async fn test_frame_roundtrip() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let payload = b"Hello, SMB2!";

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let frame = read_frame(&mut stream).await.unwrap();
            assert_eq!(&frame[..], payload);
        });

        let mut client = TcpStream::connect(addr).await.unwrap();
        write_frame(&mut client, payload).await.unwrap();

        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_keep_alive_is_skipped() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_all(&[0x85, 0, 0, 0]).await.unwrap();
        write_frame(&mut client, b"abc").await.unwrap();
        assert_eq!(&read_frame(&mut server).await.unwrap()[..], b"abc");
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_all(&[0x00, 0xFF, 0xFF, 0xFF]).await.unwrap();
        let err = read_frame(&mut server).await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn test_eof_is_unexpected_eof() {
        let (client, mut server) = tokio::io::duplex(64);
        drop(client);
        let err = read_frame(&mut server).await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::UnexpectedEof);
    }
}
