//! `patchio`: newline framing over byte streams.
//!
//! The switchboard's wire protocol is line oriented, but a stream transport
//! gives no alignment guarantees: one read may carry zero, one, or several
//! complete frames plus a trailing partial frame. Both helpers here keep a
//! persistent accumulation buffer and only ever surface complete,
//! newline-terminated frames (`BytesMut::split_to(..).freeze()`, no copying).

pub mod line;
pub mod scan;
