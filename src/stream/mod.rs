//! In-memory byte source and sink.
//!
//! [Reader] is a cursor over a byte slice; [Writer] owns a growable buffer and
//! the reservation ledger for it. Both carry a default byte order and an optional
//! varint width flag that records fall back to.

mod reader;
mod writer;

pub use reader::Reader;
pub use writer::Writer;

use crate::{
    byte_order::ByteOrder,
    errors::Result,
    format::Format,
};

/// Splits optional marker from format text, defaulting to `fallback`.
fn parse_format(text: &str, fallback: ByteOrder) -> Result<(ByteOrder, Format)> {
    let (order, format) = Format::parse_with_order(text)?;
    Ok((order.unwrap_or(fallback), format))
}
