use crate::error::VtestError;

/// Command opcodes. Wire values are this crate's own numbering; nothing
/// outside this codebase needs to agree with them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Opcode {
    /// Names the connection's context; payload is the debug name bytes.
    CreateContext = 1,
    /// Probes feature support before the renderer context exists.
    PingProtocolVersion = 2,
    /// Negotiates the protocol version.
    ProtocolVersion = 3,
    /// Queries a renderer parameter.
    GetParam = 4,
    /// Queries whether a capset is supported and its size.
    GetCapset = 5,
    /// Selects a capset id for the context, once.
    ContextInit = 6,
    /// Fetches the default capset blob.
    GetCaps = 7,
    /// Fetches the default capset blob (v2).
    GetCaps2 = 8,
    /// Creates a server-managed resource.
    ResourceCreate = 9,
    /// Creates a server-managed resource with an shm backing of a given size.
    ResourceCreate2 = 10,
    /// Creates a blob resource backed by an exportable fd.
    ResourceCreateBlob = 11,
    /// Releases a resource.
    ResourceUnref = 12,
    /// Submits a command stream (legacy, implicit-fence path).
    SubmitCmd = 13,
    /// Reads resource data into an inline response payload.
    TransferGet = 14,
    /// Writes inline request payload data into a resource.
    TransferPut = 15,
    /// As [`Opcode::TransferGet`], but discards the data without a renderer call.
    TransferGetNop = 16,
    /// As [`Opcode::TransferPut`], but skips the renderer call.
    TransferPutNop = 17,
    /// Reads resource data via its mapped shm iov.
    TransferGet2 = 18,
    /// Writes resource data via its mapped shm iov.
    TransferPut2 = 19,
    /// As [`Opcode::TransferGet2`], but skips the renderer call.
    TransferGet2Nop = 20,
    /// As [`Opcode::TransferPut2`], but skips the renderer call.
    TransferPut2Nop = 21,
    /// Polls the legacy implicit-fence counter.
    ResourceBusyWait = 22,
    /// Creates a timeline.
    SyncCreate = 23,
    /// Releases a timeline.
    SyncUnref = 24,
    /// Reads a timeline's current value.
    SyncRead = 25,
    /// Bumps a timeline's value, waking any satisfied waits.
    SyncWrite = 26,
    /// Registers a wait over a set of timeline thresholds.
    SyncWait = 27,
    /// Submits a batched command stream with per-batch sync-queue routing.
    SubmitCmd2 = 28,
}

impl TryFrom<u32> for Opcode {
    type Error = VtestError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Ok(match value {
            1 => Self::CreateContext,
            2 => Self::PingProtocolVersion,
            3 => Self::ProtocolVersion,
            4 => Self::GetParam,
            5 => Self::GetCapset,
            6 => Self::ContextInit,
            7 => Self::GetCaps,
            8 => Self::GetCaps2,
            9 => Self::ResourceCreate,
            10 => Self::ResourceCreate2,
            11 => Self::ResourceCreateBlob,
            12 => Self::ResourceUnref,
            13 => Self::SubmitCmd,
            14 => Self::TransferGet,
            15 => Self::TransferPut,
            16 => Self::TransferGetNop,
            17 => Self::TransferPutNop,
            18 => Self::TransferGet2,
            19 => Self::TransferPut2,
            20 => Self::TransferGet2Nop,
            21 => Self::TransferPut2Nop,
            22 => Self::ResourceBusyWait,
            23 => Self::SyncCreate,
            24 => Self::SyncUnref,
            25 => Self::SyncRead,
            26 => Self::SyncWrite,
            27 => Self::SyncWait,
            28 => Self::SubmitCmd2,
            other => return Err(VtestError::UnknownOpcode(other)),
        })
    }
}

/// Parameters reported by `GET_PARAM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Param {
    /// The maximum number of sync queues per context; 0 if
    /// `VIRGL_DISABLE_MT` disables the modern sync path.
    MaxSyncQueueCount = 1,
}

impl TryFrom<u32> for Param {
    type Error = VtestError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::MaxSyncQueueCount),
            _ => Err(VtestError::Invalid),
        }
    }
}
