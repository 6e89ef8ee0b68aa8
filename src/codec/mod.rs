//! # Entry codecs
//!
//! Entry codecs compress individual record fields before the record enters a chunk.
//! The [`VariationCodec`] stores sequence variations as unary-prefixed 3-bit bases and
//! stores positions and mapping qualities as signed deltas against the previous record
//! of the same chunk, all through the bit streams in [`bits`].
//!
//! The first byte of every payload is the codec's registration code. A decoder that does
//! not recognise the code returns `None` and the record is passed through untouched.

pub mod bits;
mod entry;

pub use entry::{EntryCodec, VariationCodec, REGISTRATION_CODE};
