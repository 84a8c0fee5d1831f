use thiserror::Error;

/// Errors which can occur during target setup and communication.
///
/// All of them are fatal to the operation in progress; nothing is retried internally. After an
/// [`UnexpectedResponse`] or [`TransportError`] the session should be treated as unreliable.
///
/// [`UnexpectedResponse`]: #variant.UnexpectedResponse
/// [`TransportError`]: #variant.TransportError
#[derive(Debug, Error)]
pub enum Error {
    /// A command packet was requested for an odd address. The bootloader's self-programming
    /// operations work word-wise, so every packet address must be even.
    #[error("address {0:#06x} is not word-aligned")]
    AddressNotWordAligned(u32),

    /// A command payload does not fit into a single 64-byte report alongside the 6-byte header.
    #[error("payload of {0} bytes does not fit into a single report")]
    PayloadTooLarge(usize),

    /// A page write was requested at an address which is not page-aligned, with more data than
    /// fits a page, or outside the application flash region.
    #[error("invalid page write of {length} bytes at {address:#07x}")]
    InvalidPageWrite {
        /// Requested page start address.
        address: u32,
        /// Length of the data to be written.
        length: usize,
    },

    /// The bootloader reported a chip identification code that is not in the catalog.
    #[error("unknown chip id {0:#04x}")]
    UnknownChipId(u8),

    /// A response did not echo the command id it acknowledges.
    #[error("device answered command {actual:#04x} where {expected:#04x} was expected")]
    UnexpectedResponse {
        /// Command id that was sent.
        expected: u8,
        /// Command id the device echoed back.
        actual: u8,
    },

    /// The firmware image contains bytes at or past the end of the application flash region.
    #[error("image reaches {end:#07x}, past the application flash end {limit:#07x}")]
    ImageExceedsFlash {
        /// Exclusive end address of the offending segment.
        end: u32,
        /// Size of the application flash region.
        limit: u32,
    },

    /// The EEPROM image contains bytes past the end of the chip's EEPROM.
    #[error("image reaches {end:#06x}, past the EEPROM end {limit:#06x}")]
    ImageExceedsEeprom {
        /// Exclusive end address of the offending write.
        end: u32,
        /// EEPROM size of the chip.
        limit: u32,
    },

    /// It was attempted to open a connection to a target which does not exist.
    #[error("target not found")]
    TargetNotFound,

    /// The given USB address pertains to an unsupported USB device (probably not even a kp_boot
    /// bootloader).
    #[error("target is unsupported")]
    UnsupportedTarget,

    /// The request was not specific enough and returned in multiple matches where only a single
    /// one is supported.
    #[error("request matched more than one target")]
    TooManyMatches,

    /// An error occurred during the raw USB communication.
    #[error("transport error: {0}")]
    TransportError(#[from] rusb::Error),
}

/// Shorthand for a Result with the crate's own Error type.
pub type Result<T> = std::result::Result<T, Error>;
