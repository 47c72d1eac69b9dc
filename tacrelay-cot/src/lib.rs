//! CoT wire-format handling for the tacrelay server
//!
//! Cursor-on-Target traffic is a stream of XML documents, each terminated by a
//! single `\n` byte. This crate turns raw, arbitrarily-chunked socket reads
//! into discrete CoT messages:
//!
//! - `StreamFramer` - per-connection byte accumulator that extracts complete
//!   newline-delimited messages and keeps the trailing fragment for the next
//!   read
//! - well-formedness validation - extracted candidates must look like a single
//!   XML document (balanced element depth); anything else is dropped and
//!   counted, never fatal
//!
//! The framer bounds its buffer against peers that never send the delimiter:
//! past a hard ceiling the buffer is cleared and framing resumes from the next
//! byte. Data loss there is intentional.
//!
//! No I/O and no async in this crate; callers feed it bytes from wherever
//! they got them.

pub mod framer;
pub mod wellformed;

pub use framer::{FramerStats, StreamFramer, DEFAULT_HARD_CAP, DEFAULT_SOFT_CAP};
pub use wellformed::is_well_formed;
