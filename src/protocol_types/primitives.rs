use std::fmt::{Debug, Display, Formatter};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::protocol_types::traits::{ReadProt, SizedProt, WriteProt};

const SEGMENT_BITS: u8 = 0x7f;
const CONTINUE_BIT: u8 = 0x80;

fn io_err(err: std::io::Error) -> String {
    format!("IO error: {:?}", err)
}

#[derive(Ord, PartialOrd, Eq, PartialEq, Clone, Copy)]
pub(crate) struct VarInt {
    pub(crate) value: i32,
}

impl From<usize> for VarInt {
    fn from(value: usize) -> Self {
        Self {
            value: value as i32,
        }
    }
}

impl From<i32> for VarInt {
    fn from(value: i32) -> Self {
        Self { value }
    }
}

impl Display for VarInt {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.value)
    }
}

impl Debug for VarInt {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.value)
    }
}

#[async_trait]
impl ReadProt for VarInt {
    async fn read(stream: &mut (impl AsyncRead + Unpin + Send)) -> Result<Self, String> {
        let mut value: i32 = 0;
        let mut pos: u32 = 0;
        loop {
            let current_byte = stream.read_u8().await.map_err(io_err)?;
            value |= ((current_byte & SEGMENT_BITS) as i32) << pos;
            if current_byte & CONTINUE_BIT == 0 {
                return Ok(Self { value });
            }
            pos += 7;
            if pos >= 32 {
                return Err("VarInt is too big".into());
            }
        }
    }
}

impl SizedProt for VarInt {
    fn prot_size(&self) -> usize {
        let mut x = self.value as u32;
        let mut count = 0;
        loop {
            x >>= 7;
            count += 1;

            if x == 0 {
                break count;
            }
        }
    }
}

#[async_trait]
impl WriteProt for VarInt {
    async fn write(&self, stream: &mut (impl AsyncWrite + Unpin + Send)) -> Result<(), String> {
        let mut x = self.value as u32;
        loop {
            let mut temp = (x & 0b0111_1111) as u8;
            x >>= 7;
            if x != 0 {
                temp |= 0b1000_0000;
            }

            stream.write_all(&[temp]).await.map_err(io_err)?;

            if x == 0 {
                break;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ReadProt for u8 {
    async fn read(stream: &mut (impl AsyncRead + Unpin + Send)) -> Result<Self, String> {
        stream.read_u8().await.map_err(io_err)
    }
}

#[async_trait]
impl WriteProt for u8 {
    async fn write(&self, stream: &mut (impl AsyncWrite + Unpin + Send)) -> Result<(), String> {
        stream.write_u8(*self).await.map_err(io_err)
    }
}

impl SizedProt for u8 {
    fn prot_size(&self) -> usize {
        1
    }
}

#[async_trait]
impl ReadProt for bool {
    async fn read(stream: &mut (impl AsyncRead + Unpin + Send)) -> Result<Self, String> {
        Ok(u8::read(stream).await? == 0x01)
    }
}

#[async_trait]
impl WriteProt for bool {
    async fn write(&self, stream: &mut (impl AsyncWrite + Unpin + Send)) -> Result<(), String> {
        // 0x01 = true, 0x00 = false
        u8::write(&if *self { 0x01 } else { 0x00 }, stream).await
    }
}

impl SizedProt for bool {
    fn prot_size(&self) -> usize {
        1
    }
}

#[async_trait]
impl ReadProt for u16 {
    async fn read(stream: &mut (impl AsyncRead + Unpin + Send)) -> Result<Self, String> {
        stream.read_u16().await.map_err(io_err)
    }
}

#[async_trait]
impl WriteProt for u16 {
    async fn write(&self, stream: &mut (impl AsyncWrite + Unpin + Send)) -> Result<(), String> {
        stream.write_u16(*self).await.map_err(io_err)
    }
}

impl SizedProt for u16 {
    fn prot_size(&self) -> usize {
        2
    }
}

#[async_trait]
impl ReadProt for i32 {
    async fn read(stream: &mut (impl AsyncRead + Unpin + Send)) -> Result<Self, String> {
        stream.read_i32().await.map_err(io_err)
    }
}

#[async_trait]
impl WriteProt for i32 {
    async fn write(&self, stream: &mut (impl AsyncWrite + Unpin + Send)) -> Result<(), String> {
        stream.write_i32(*self).await.map_err(io_err)
    }
}

impl SizedProt for i32 {
    fn prot_size(&self) -> usize {
        4
    }
}

/// A byte array announced by a 32-bit big-endian length, as used for compressed payloads.
#[derive(Clone, PartialEq, Eq)]
pub(crate) struct PrefixedBytes {
    pub(crate) bytes: Vec<u8>,
}

impl From<Vec<u8>> for PrefixedBytes {
    fn from(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }
}

impl Debug for PrefixedBytes {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{} bytes]", self.bytes.len())
    }
}

#[async_trait]
impl ReadProt for PrefixedBytes {
    async fn read(stream: &mut (impl AsyncRead + Unpin + Send)) -> Result<Self, String> {
        let len = stream.read_u32().await.map_err(io_err)? as usize;
        let mut bytes = vec![0u8; len];
        stream.read_exact(&mut bytes).await.map_err(io_err)?;
        Ok(Self { bytes })
    }
}

#[async_trait]
impl WriteProt for PrefixedBytes {
    async fn write(&self, stream: &mut (impl AsyncWrite + Unpin + Send)) -> Result<(), String> {
        stream
            .write_u32(self.bytes.len() as u32)
            .await
            .map_err(io_err)?;
        stream.write_all(&self.bytes).await.map_err(io_err)
    }
}

impl SizedProt for PrefixedBytes {
    fn prot_size(&self) -> usize {
        4 + self.bytes.len()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn varint_0() -> Result<(), String> {
        let mut buf: Vec<u8> = vec![];
        VarInt { value: 0 }.write(&mut buf).await?;
        assert_eq!(buf, vec![0]);
        Ok(())
    }

    #[tokio::test]
    async fn varint_25565() -> Result<(), String> {
        let mut buf: Vec<u8> = vec![];
        VarInt { value: 25565 }.write(&mut buf).await?;
        assert_eq!(buf, vec![221, 199, 1]);
        assert_eq!(VarInt { value: 25565 }.prot_size(), 3);
        Ok(())
    }

    #[tokio::test]
    async fn varint_n1() -> Result<(), String> {
        let mut buf: Vec<u8> = vec![];
        VarInt { value: -1 }.write(&mut buf).await?;
        assert_eq!(buf, vec![255, 255, 255, 255, 15]);
        let read = VarInt::read(&mut buf.as_slice()).await?;
        assert_eq!(read.value, -1);
        Ok(())
    }

    #[tokio::test]
    async fn varint_too_big() {
        let buf = vec![0xffu8; 6];
        assert!(VarInt::read(&mut buf.as_slice()).await.is_err());
    }

    #[tokio::test]
    async fn prefixed_bytes_big_endian_length() -> Result<(), String> {
        let mut buf: Vec<u8> = vec![];
        PrefixedBytes::from(vec![7u8; 258]).write(&mut buf).await?;
        assert_eq!(&buf[..4], &[0, 0, 1, 2]);
        assert_eq!(buf.len(), 262);
        Ok(())
    }

    #[tokio::test]
    async fn truncated_prefixed_bytes() {
        let buf = vec![0u8, 0, 0, 9, 1, 2];
        assert!(PrefixedBytes::read(&mut buf.as_slice()).await.is_err());
    }
}
