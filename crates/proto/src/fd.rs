use std::io::{IoSlice, IoSliceMut};
use std::mem::MaybeUninit;
use std::os::fd::{AsFd, BorrowedFd, OwnedFd};

use rustix::net::{
    RecvAncillaryBuffer, RecvAncillaryMessage, RecvFlags, SendAncillaryBuffer,
    SendAncillaryMessage, SendFlags,
};

use crate::error::ProtoError;
use crate::Result;

/// A 1-byte dummy payload sent alongside an `SCM_RIGHTS` control message.
const DUMMY_PAYLOAD: [u8; 1] = [0];

/// Sends `fd` to `socket` as ancillary data on a 1-byte dummy payload. `fd`
/// remains owned by the caller, who must close it after this call returns
/// (per the wire contract — the fd is duplicated by the receiving kernel).
pub fn send_fd(socket: impl AsFd, fd: BorrowedFd<'_>) -> Result<()> {
    let iov = [IoSlice::new(&DUMMY_PAYLOAD)];
    let mut space = [MaybeUninit::uninit(); rustix::cmsg_space!(ScmRights(1))];
    let mut cmsg_buffer = SendAncillaryBuffer::new(&mut space);
    cmsg_buffer.push(SendAncillaryMessage::ScmRights(&[fd]));
    rustix::net::sendmsg(socket, &iov, &mut cmsg_buffer, SendFlags::empty())
        .map_err(|errno| ProtoError::Io(errno.into()))?;
    Ok(())
}

/// Receives a single fd sent via [`send_fd`]. Returns `Ok(None)` if the
/// matching frame was read but no ancillary fd accompanied it (a protocol
/// error from a well-behaved peer, but callers decide how to treat it).
pub fn recv_fd(socket: impl AsFd) -> Result<Option<OwnedFd>> {
    let mut payload = [0u8; 1];
    let mut iov = [IoSliceMut::new(&mut payload)];
    let mut space = [MaybeUninit::uninit(); rustix::cmsg_space!(ScmRights(1))];
    let mut cmsg_buffer = RecvAncillaryBuffer::new(&mut space);
    let msg = rustix::net::recvmsg(socket, &mut iov, &mut cmsg_buffer, RecvFlags::empty())
        .map_err(|errno| ProtoError::Io(errno.into()))?;
    if msg.bytes == 0 {
        return Err(ProtoError::Short);
    }
    let fd = cmsg_buffer.drain().find_map(|msg| match msg {
        RecvAncillaryMessage::ScmRights(mut fds) => fds.next(),
        _ => None,
    });
    Ok(fd)
}
