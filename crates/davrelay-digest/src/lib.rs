//! Checksum catalog and digest negotiation for HTTP third-party copies.
//!
//! The storage layer knows checksums by its own names (`adler32`, `sha256`,
//! `cksum`); HTTP clients speak RFC 9530 digest names (`adler32`, `sha-256`,
//! `UNIXcksum`). This crate bridges the two:
//!
//! - [`DigestCatalog`] holds the configured, priority-ordered checksums and
//!   selects the one to use for a client's request.
//! - [`parse_repr_digest`] and [`parse_want_repr_digest`] read the
//!   `Repr-Digest` and `Want-Repr-Digest` header values.
//!
//! Nothing here performs I/O and nothing here fails on malformed header
//! input; malformed entries are skipped.
//!
//! # Example
//!
//! ```
//! use davrelay_digest::DigestCatalog;
//!
//! let catalog = DigestCatalog::configure("0:adler32,1:crc32").unwrap();
//! assert_eq!(catalog.select("crc32,adler32").unwrap().storage_name(), "crc32");
//! assert_eq!(catalog.select("DOES_NOT_EXIST").unwrap().storage_name(), "adler32");
//! ```

pub use self::catalog::{DigestCatalog, DigestDescriptor};
pub use self::error::{DigestError, Result};
pub use self::header::{DigestPreference, parse_repr_digest, parse_want_repr_digest};

mod catalog;
mod error;
mod header;
