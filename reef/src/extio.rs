//! Extend AsyncRead and AsyncWrite with some convenience methods for binary i/o
//!
use std::io;

use async_trait::async_trait;
use futures::{io as aio, AsyncReadExt, AsyncWriteExt};

#[async_trait]
pub(crate) trait ExtendedAsyncRead: aio::AsyncRead {
    /// Read a byte from a stream
    async fn read_byte(&mut self) -> io::Result<u8>;

    /// Read a Big Endian encoded 32 bit unsigned integer from a stream
    async fn read_u32(&mut self) -> io::Result<u32>;

    /// Read a Big Endian encoded 64 bit unsigned integer from a stream
    async fn read_u64(&mut self) -> io::Result<u64>;

    /// Read a Big Endian encoded 32 bit signed integer from a stream
    async fn read_i32(&mut self) -> io::Result<i32>;

    /// Read a Big Endian encoded 64 bit signed integer from a stream
    async fn read_i64(&mut self) -> io::Result<i64>;

    /// Read a Big Endian encoded 32 bit float from a stream
    async fn read_f32(&mut self) -> io::Result<f32>;

    /// Read a Big Endian encoded 64 bit float from a stream
    async fn read_f64(&mut self) -> io::Result<f64>;

    /// Read a length-prefixed UTF-8 string from a stream
    async fn read_str(&mut self) -> io::Result<String>;
}

#[async_trait]
impl<R: aio::AsyncRead + Unpin + Send> ExtendedAsyncRead for R {
    async fn read_byte(&mut self) -> io::Result<u8> {
        let mut buffer = [0; 1];
        self.read_exact(&mut buffer).await?;

        Ok(buffer[0])
    }

    async fn read_u32(&mut self) -> io::Result<u32> {
        let mut buffer = [0; 4];
        self.read_exact(&mut buffer).await?;

        Ok(u32::from_be_bytes(buffer))
    }

    async fn read_u64(&mut self) -> io::Result<u64> {
        let mut buffer = [0; 8];
        self.read_exact(&mut buffer).await?;

        Ok(u64::from_be_bytes(buffer))
    }

    async fn read_i32(&mut self) -> io::Result<i32> {
        let mut buffer = [0; 4];
        self.read_exact(&mut buffer).await?;

        Ok(i32::from_be_bytes(buffer))
    }

    async fn read_i64(&mut self) -> io::Result<i64> {
        let mut buffer = [0; 8];
        self.read_exact(&mut buffer).await?;

        Ok(i64::from_be_bytes(buffer))
    }

    async fn read_f32(&mut self) -> io::Result<f32> {
        let mut buffer = [0; 4];
        self.read_exact(&mut buffer).await?;

        Ok(f32::from_be_bytes(buffer))
    }

    async fn read_f64(&mut self) -> io::Result<f64> {
        let mut buffer = [0; 8];
        self.read_exact(&mut buffer).await?;

        Ok(f64::from_be_bytes(buffer))
    }

    async fn read_str(&mut self) -> io::Result<String> {
        let length = self.read_byte().await? as usize;
        let mut buffer = vec![0; length];
        self.read_exact(&mut buffer).await?;

        String::from_utf8(buffer).map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))
    }
}

#[async_trait]
pub(crate) trait ExtendedAsyncWrite: aio::AsyncWrite {
    /// Write a byte to a stream
    async fn write_byte(&mut self, byte: u8) -> io::Result<()>;

    /// Write a Big Endian encoded 32 bit unsigned integer to a stream
    async fn write_u32(&mut self, word: u32) -> io::Result<()>;

    /// Write a Big Endian encoded 64 bit unsigned integer to a stream
    async fn write_u64(&mut self, word: u64) -> io::Result<()>;

    /// Write a Big Endian encoded 32 bit signed integer to a stream
    async fn write_i32(&mut self, word: i32) -> io::Result<()>;

    /// Write a Big Endian encoded 64 bit signed integer to a stream
    async fn write_i64(&mut self, word: i64) -> io::Result<()>;

    /// Write a Big Endian encoded 32 bit float to a stream
    async fn write_f32(&mut self, word: f32) -> io::Result<()>;

    /// Write a Big Endian encoded 64 bit float to a stream
    async fn write_f64(&mut self, word: f64) -> io::Result<()>;

    /// Write a length-prefixed UTF-8 string to a stream
    async fn write_str(&mut self, string: &str) -> io::Result<()>;
}

#[async_trait]
impl<W: aio::AsyncWrite + Unpin + Send> ExtendedAsyncWrite for W {
    async fn write_byte(&mut self, byte: u8) -> io::Result<()> {
        let buffer = [byte];
        self.write_all(&buffer).await?;

        Ok(())
    }

    async fn write_u32(&mut self, word: u32) -> io::Result<()> {
        let buffer = word.to_be_bytes();
        self.write_all(&buffer).await?;

        Ok(())
    }

    async fn write_u64(&mut self, word: u64) -> io::Result<()> {
        let buffer = word.to_be_bytes();
        self.write_all(&buffer).await?;

        Ok(())
    }

    async fn write_i32(&mut self, word: i32) -> io::Result<()> {
        let buffer = word.to_be_bytes();
        self.write_all(&buffer).await?;

        Ok(())
    }

    async fn write_i64(&mut self, word: i64) -> io::Result<()> {
        let buffer = word.to_be_bytes();
        self.write_all(&buffer).await?;

        Ok(())
    }

    async fn write_f32(&mut self, word: f32) -> io::Result<()> {
        let buffer = word.to_be_bytes();
        self.write_all(&buffer).await?;

        Ok(())
    }

    async fn write_f64(&mut self, word: f64) -> io::Result<()> {
        let buffer = word.to_be_bytes();
        self.write_all(&buffer).await?;

        Ok(())
    }

    async fn write_str(&mut self, string: &str) -> io::Result<()> {
        if string.len() > u8::MAX as usize {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "string too long for length prefix",
            ));
        }
        self.write_byte(string.len() as u8).await?;
        self.write_all(string.as_bytes()).await?;

        Ok(())
    }
}
