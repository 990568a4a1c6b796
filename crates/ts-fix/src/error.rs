/// Errors raised while rewriting a transport stream.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TsFixError {
    #[error("stream ended with a partial packet of {0} bytes remaining")]
    TruncatedPacket(usize),

    #[error("sync byte is incorrect (got 0x{0:02x})")]
    BadSyncByte(u8),

    #[error("transport error indicator is set")]
    TransportError,

    #[error("transport scrambling control indicates scrambled data")]
    Scrambled,

    #[error("payload unit start indicated but packet has no payload")]
    PusiWithoutPayload,

    #[error("adaptation field indicates PCR but is too small")]
    AdaptationFieldTooSmall,

    #[error("payload too small to read unit header")]
    UnitHeaderTooSmall,

    #[error("payload too small to read PTS")]
    PtsTooSmall,

    #[error("PTS marker bits are malformed")]
    BadTimestampMarker,

    #[error("unexpected timestamp tag (expected {expected:#06b}, got {actual:#06b})")]
    BadTimestampTag { expected: u8, actual: u8 },

    #[error("DTS timestamp is present; rewriting DTS could move packets before the start time")]
    DtsNotSupported,
}
