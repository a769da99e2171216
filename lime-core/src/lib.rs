//! Core functionality for unpacking, packing, re-signing and brute-forcing
//! "Lime"-encrypted save-data containers.
//!
//! A save container is a sequence of 4096-byte payload pages, each carrying
//! four key banks and a checksum, wrapped by a fixed header and footer. The
//! per-file secret is a 32-bit account id; everything else needed to
//! re-derive a segment's cipher key is stored in the segment itself, which
//! is what makes the brute-force search possible.
//!
//! # Architecture
//!
//! ```text
//! wideint     (fixed 2176-bit arithmetic: mul, rem, modexp)
//!     ↓
//! kdf         (account id + key banks → 256-bit segment key)
//!     ↓
//! aes         (round-key schedule + self-feeding keystream)
//!     ↓                         sponge (segment checksum / wrong-key oracle)
//! codec       (header / segments / footer container, whole-file signature)
//!     ↓
//! bruteforce, ops   (account-id search; unpack / pack / resign batches)
//! ```
//!
//! # Examples
//!
//! ```
//! use lime_core::SaveFile;
//!
//! let payload = vec![7u8; 5000];
//! let mut file = SaveFile::parse(&payload).unwrap();
//! assert!(!file.is_encrypted());
//!
//! file.encrypt(12345).unwrap();
//! let packed = file.serialize();
//!
//! let mut parsed = SaveFile::parse(&packed).unwrap();
//! assert!(parsed.is_encrypted());
//! parsed.decrypt(12345).unwrap();
//! assert_eq!(parsed.serialize(), payload);
//! ```

pub mod aes;
pub mod bruteforce;
pub mod codec;
pub mod error;
pub mod kdf;
pub mod keys;
pub mod ops;
pub mod sponge;
pub mod wideint;

// Re-export commonly used items
pub use codec::{SaveFile, Segment};
pub use error::LimeError;
pub use ops::{Engine, account_id_from_steam64, pack, resign, unpack};
