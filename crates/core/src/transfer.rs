use vtest_registry::Resource;
use vtest_renderer::Renderer;

use crate::error::VtestError;
use crate::Result;

/// A parsed transfer header. The wire carries a fixed word count;
/// `box_args` holds the renderer-opaque region/level fields this adapter
/// does not interpret itself.
#[derive(Debug, Clone, Copy)]
pub struct TransferHeader {
    /// The resource handle being transferred.
    pub handle: u32,
    /// Byte offset into the resource's backing store.
    pub offset: u32,
    /// Size of the inline payload, "v1" transfers only.
    pub data_size: u32,
    /// Opaque box/level arguments, passed through unexamined.
    pub box_args: [u32; 7],
}

impl TransferHeader {
    /// Parses a 10-word "v1" transfer header (`handle, offset, data_size,
    /// box_args[7]`).
    pub fn parse_v1(words: &[u32]) -> Result<Self> {
        if words.len() != 10 {
            return Err(VtestError::Invalid);
        }
        Ok(TransferHeader {
            handle: words[0],
            offset: words[1],
            data_size: words[2],
            box_args: words[3..10].try_into().unwrap(),
        })
    }

    /// Parses a 9-word "v2" transfer header (`handle, offset, box_args[7]`);
    /// v2 transfers have no `data_size` of their own — they move exactly
    /// the bytes from `offset` to the end of the resource's mapped iov.
    pub fn parse_v2(words: &[u32]) -> Result<Self> {
        if words.len() != 9 {
            return Err(VtestError::Invalid);
        }
        Ok(TransferHeader {
            handle: words[0],
            offset: words[1],
            data_size: 0,
            box_args: words[2..9].try_into().unwrap(),
        })
    }
}

/// "v1" `TRANSFER_GET`: allocates a staging buffer of `header.data_size` and
/// fills it from the renderer, unless `nop` — the nop variants still
/// produce bytes, for benchmarking the protocol path without rendering
/// work.
pub fn transfer_get(
    renderer: &dyn Renderer,
    server_id: u32,
    header: &TransferHeader,
    nop: bool,
) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; header.data_size as usize];
    if !nop {
        renderer.transfer_read_iov(server_id, header.offset as u64, &mut buf)?;
    }
    Ok(buf)
}

/// "v1" `TRANSFER_PUT`: writes `data` into the renderer, unless `nop`.
pub fn transfer_put(
    renderer: &dyn Renderer,
    server_id: u32,
    header: &TransferHeader,
    data: &[u8],
    nop: bool,
) -> Result<()> {
    if !nop {
        renderer.transfer_write_iov(server_id, header.offset as u64, data)?;
    }
    Ok(())
}

/// "v2" `TRANSFER_GET2`: syncs the renderer's state into the resource's
/// already-mapped shm iov; no bytes cross the client socket and the
/// response is empty. `offset` must be strictly less than the iov's
/// length.
pub fn transfer_get2(
    renderer: &dyn Renderer,
    server_id: u32,
    resource: &mut Resource,
    offset: u32,
    nop: bool,
) -> Result<()> {
    let iov = resource.iov_mut().ok_or(VtestError::Invalid)?;
    if offset as usize >= iov.len() {
        return Err(VtestError::Fault);
    }
    if nop {
        return Ok(());
    }
    let offset = offset as usize;
    let slice = &mut iov.as_mut_slice()[offset..];
    renderer.transfer_read_iov(server_id, offset as u64, slice)?;
    Ok(())
}

/// "v2" `TRANSFER_PUT2`: pushes the bytes the client already wrote into the
/// mapped iov through to the renderer.
pub fn transfer_put2(
    renderer: &dyn Renderer,
    server_id: u32,
    resource: &mut Resource,
    offset: u32,
    nop: bool,
) -> Result<()> {
    let iov = resource.iov_mut().ok_or(VtestError::Invalid)?;
    if offset as usize >= iov.len() {
        return Err(VtestError::Fault);
    }
    if nop {
        return Ok(());
    }
    let offset = offset as usize;
    let slice = &iov.as_slice()[offset..];
    renderer.transfer_write_iov(server_id, offset as u64, slice)?;
    Ok(())
}
