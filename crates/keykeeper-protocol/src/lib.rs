//! Line protocol spoken by the keykeeper central firmware.
//!
//! The firmware runs a shell on its serial console: the host writes
//! CRLF-terminated commands and the firmware answers with colored log lines
//! and plain table rows. This crate covers the three pieces of that
//! conversation that do not need a live port:
//!
//! - [`FirmwareLineCodec`]: byte stream to clean text lines and back
//! - [`parser`]: log lines to [`StatusEvent`]s, table rows to [`Bond`] and
//!   [`SpaceKeyRecord`]
//! - [`Command`]: every command the host issues, rendered to wire text

pub mod codec;
pub mod commands;
pub mod parser;

pub use codec::{CodecError, FirmwareLineCodec, strip_ansi};
pub use commands::Command;
pub use parser::{
    Bond, SpaceKeyRecord, StatusEvent, StatusKind, StatusMatch, is_command_echo, is_done,
    is_static_address_unsupported, match_status, parse_bond_row, parse_space_key_row,
    parse_status,
};
