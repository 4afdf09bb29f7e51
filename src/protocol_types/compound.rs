use async_nbt::io::Flavor;
use async_nbt::NbtCompound;
use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::protocol_types::traits::{ReadProt, WriteProt};

// Compound records are written uncompressed; compression is applied by whoever frames them.
#[async_trait]
impl WriteProt for NbtCompound {
    async fn write(&self, stream: &mut (impl AsyncWrite + Unpin + Send)) -> Result<(), String> {
        async_nbt::io::write_nbt(stream, None, self, Flavor::Uncompressed)
            .await
            .map_err(|x| format!("NBT error: {:?}", x))?;
        Ok(())
    }
}

#[async_trait]
impl ReadProt for NbtCompound {
    async fn read(stream: &mut (impl AsyncRead + Unpin + Send)) -> Result<Self, String>
    where
        Self: Sized,
    {
        Ok(async_nbt::io::read_nbt(stream, Flavor::Uncompressed, true)
            .await
            .map_err(|x| format!("NBT error: {:?}", x))?
            .0)
    }
}
