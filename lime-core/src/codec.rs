//! Lime save-container layout: header, key-banked segments, footer, and the
//! trailing whole-file signature.
//!
//! All integers are little-endian. Encode and decode are driven by explicit
//! offsets into the byte stream; nothing is cast from memory. A file that
//! does not parse as a container is classified as raw decrypted payload.

use crate::aes::{self, KeySchedule};
use crate::error::LimeError;
use crate::kdf::{BANK_WORDS, BANKS_PER_SEGMENT, KeyBank, derive_segment_key, populate_banks};
use crate::sponge::{self, CHECKSUM_LANES};
use rand::RngCore;

/// Container magic, "DSSS".
pub const HEADER_MAGIC: u32 = 0x53535344;

/// Encryption-type tag for the Lime scheme.
pub const ENCRYPTION_TYPE_LIME: u32 = 0x10;

pub const HEADER_SIZE: usize = 16;
pub const BANK_SIZE: usize = BANK_WORDS * 8 * 2;
pub const PAYLOAD_SIZE: usize = 4096;
pub const CHECKSUM_SIZE: usize = CHECKSUM_LANES * 8;
pub const SEGMENT_SIZE: usize = BANKS_PER_SEGMENT * BANK_SIZE + PAYLOAD_SIZE + CHECKSUM_SIZE;
pub const FOOTER_SALT_SIZE: usize = 128;
pub const FOOTER_SIZE: usize = FOOTER_SALT_SIZE + 8 + 4;
pub const TRAILER_SIZE: usize = 4;

/// Seed for the whole-file signature.
pub const SIGNATURE_SEED: u32 = 0xFFFFFFFF;

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    let mut b = [0u8; 4];
    b.copy_from_slice(&bytes[offset..offset + 4]);
    u32::from_le_bytes(b)
}

fn read_u64(bytes: &[u8], offset: usize) -> u64 {
    let mut b = [0u8; 8];
    b.copy_from_slice(&bytes[offset..offset + 8]);
    u64::from_le_bytes(b)
}

/// 16-byte fixed header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub magic: u32,
    pub unknown1: u32,
    pub encryption_type: u32,
    pub unknown2: u32,
}

impl Header {
    fn read(bytes: &[u8]) -> Header {
        Header {
            magic: read_u32(bytes, 0),
            unknown1: read_u32(bytes, 4),
            encryption_type: read_u32(bytes, 8),
            unknown2: read_u32(bytes, 12),
        }
    }

    fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.magic.to_le_bytes());
        out.extend_from_slice(&self.unknown1.to_le_bytes());
        out.extend_from_slice(&self.encryption_type.to_le_bytes());
        out.extend_from_slice(&self.unknown2.to_le_bytes());
    }
}

/// 140-byte footer: random salt, decrypted length, legacy signature field.
#[derive(Debug, Clone)]
pub struct Footer {
    pub salt: [u8; FOOTER_SALT_SIZE],
    pub decrypted_length: i64,
    pub signature: u32,
}

impl Footer {
    fn read(bytes: &[u8]) -> Footer {
        let mut salt = [0u8; FOOTER_SALT_SIZE];
        salt.copy_from_slice(&bytes[..FOOTER_SALT_SIZE]);
        Footer {
            salt,
            decrypted_length: read_u64(bytes, FOOTER_SALT_SIZE) as i64,
            signature: read_u32(bytes, FOOTER_SALT_SIZE + 8),
        }
    }

    fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.salt);
        out.extend_from_slice(&self.decrypted_length.to_le_bytes());
        out.extend_from_slice(&self.signature.to_le_bytes());
    }
}

/// One 4640-byte data segment: four key banks, a payload page, a checksum.
#[derive(Debug, Clone)]
pub struct Segment {
    pub banks: [KeyBank; BANKS_PER_SEGMENT],
    pub payload: Box<[u8; PAYLOAD_SIZE]>,
    pub checksum: [u64; CHECKSUM_LANES],
}

impl Segment {
    fn empty() -> Segment {
        Segment {
            banks: [KeyBank::default(); BANKS_PER_SEGMENT],
            payload: Box::new([0u8; PAYLOAD_SIZE]),
            checksum: [0u64; CHECKSUM_LANES],
        }
    }

    fn read(bytes: &[u8]) -> Segment {
        let mut segment = Segment::empty();
        let mut offset = 0;
        for bank in segment.banks.iter_mut() {
            for word in bank.header.iter_mut() {
                *word = read_u64(bytes, offset);
                offset += 8;
            }
            for word in bank.fragment.iter_mut() {
                *word = read_u64(bytes, offset);
                offset += 8;
            }
        }
        segment
            .payload
            .copy_from_slice(&bytes[offset..offset + PAYLOAD_SIZE]);
        offset += PAYLOAD_SIZE;
        for lane in segment.checksum.iter_mut() {
            *lane = read_u64(bytes, offset);
            offset += 8;
        }
        segment
    }

    fn write(&self, out: &mut Vec<u8>) {
        for bank in self.banks.iter() {
            for word in bank.header.iter() {
                out.extend_from_slice(&word.to_le_bytes());
            }
            for word in bank.fragment.iter() {
                out.extend_from_slice(&word.to_le_bytes());
            }
        }
        out.extend_from_slice(&self.payload[..]);
        for lane in self.checksum.iter() {
            out.extend_from_slice(&lane.to_le_bytes());
        }
    }
}

/// A parsed save file: header, segments, footer, and its encryption state.
#[derive(Debug, Clone)]
pub struct SaveFile {
    pub header: Header,
    pub segments: Vec<Segment>,
    pub footer: Footer,
    encrypted: bool,
}

impl SaveFile {
    /// Parses `bytes` as a Lime container; a structural failure falls back
    /// to classifying the bytes as raw decrypted payload.
    pub fn parse(bytes: &[u8]) -> Result<SaveFile, LimeError> {
        match SaveFile::parse_container(bytes) {
            Ok(file) => Ok(file),
            Err(err) if err.is_structural() => Ok(SaveFile::from_plain(bytes)),
            Err(err) => Err(err),
        }
    }

    /// Strict container parse: header, whole segments, footer.
    pub fn parse_container(bytes: &[u8]) -> Result<SaveFile, LimeError> {
        let overhead = HEADER_SIZE + FOOTER_SIZE + TRAILER_SIZE;
        if bytes.len() < overhead {
            return Err(LimeError::MisalignedContainer(bytes.len()));
        }
        let header = Header::read(bytes);
        if header.magic != HEADER_MAGIC {
            return Err(LimeError::BadMagic(header.magic));
        }
        if header.encryption_type != ENCRYPTION_TYPE_LIME {
            return Err(LimeError::UnsupportedEncryption(header.encryption_type));
        }
        let body = bytes.len() - overhead;
        if body % SEGMENT_SIZE != 0 {
            return Err(LimeError::MisalignedContainer(bytes.len()));
        }
        let count = body / SEGMENT_SIZE;
        let mut segments = Vec::with_capacity(count);
        for i in 0..count {
            let start = HEADER_SIZE + i * SEGMENT_SIZE;
            segments.push(Segment::read(&bytes[start..start + SEGMENT_SIZE]));
        }
        let footer = Footer::read(&bytes[HEADER_SIZE + body..]);
        // The trailing signature is recomputed on every write and is not
        // verified on read.
        Ok(SaveFile {
            header,
            segments,
            footer,
            encrypted: true,
        })
    }

    /// Wraps raw decrypted payload into page-aligned segments.
    pub fn from_plain(bytes: &[u8]) -> SaveFile {
        let mut segments = Vec::with_capacity(bytes.len().div_ceil(PAYLOAD_SIZE));
        for chunk in bytes.chunks(PAYLOAD_SIZE) {
            let mut segment = Segment::empty();
            segment.payload[..chunk.len()].copy_from_slice(chunk);
            segments.push(segment);
        }
        SaveFile {
            header: Header {
                magic: HEADER_MAGIC,
                unknown1: 0,
                encryption_type: ENCRYPTION_TYPE_LIME,
                unknown2: 0,
            },
            segments,
            footer: Footer {
                salt: [0u8; FOOTER_SALT_SIZE],
                decrypted_length: bytes.len() as i64,
                signature: 0,
            },
            encrypted: false,
        }
    }

    pub fn is_encrypted(&self) -> bool {
        self.encrypted
    }

    /// Decrypts every segment in place. Segment 0 is the oracle: its
    /// checksum is validated on a copy first, so a wrong account id leaves
    /// the file untouched. Later segments share the account id and are
    /// transformed unconditionally once segment 0 validates.
    pub fn decrypt(&mut self, account_id: u32) -> Result<(), LimeError> {
        if !self.encrypted {
            return Err(LimeError::BadState("file is already decrypted"));
        }
        for (index, segment) in self.segments.iter_mut().enumerate() {
            let key = derive_segment_key(account_id, &segment.banks)?;
            let schedule = KeySchedule::expand(&key);
            if index == 0 {
                let mut page = segment.payload.clone();
                aes::apply_keystream(&schedule, &mut page[..]);
                if sponge::checksum(&page[..]) != segment.checksum {
                    return Err(LimeError::WrongKey);
                }
                segment.payload = page;
            } else {
                aes::apply_keystream(&schedule, &mut segment.payload[..]);
            }
        }
        self.encrypted = false;
        Ok(())
    }

    /// Encrypts every segment in place for `account_id`, stamping fresh key
    /// banks and checksums.
    pub fn encrypt(&mut self, account_id: u32) -> Result<(), LimeError> {
        self.encrypt_with(account_id, &mut rand::thread_rng())
    }

    pub fn encrypt_with(&mut self, account_id: u32, rng: &mut dyn RngCore) -> Result<(), LimeError> {
        if self.encrypted {
            return Err(LimeError::BadState("file is already encrypted"));
        }
        for segment in self.segments.iter_mut() {
            populate_banks(account_id, &mut segment.banks, rng)?;
            let key = derive_segment_key(account_id, &segment.banks)?;
            let schedule = KeySchedule::expand(&key);
            segment.checksum = sponge::checksum(&segment.payload[..]);
            aes::apply_keystream(&schedule, &mut segment.payload[..]);
        }
        self.encrypted = true;
        Ok(())
    }

    /// Serializes the file. Encrypted files get a fresh footer salt and the
    /// trailing whole-file signature; decrypted files serialize as raw
    /// payload truncated to the recorded decrypted length.
    pub fn serialize(&mut self) -> Vec<u8> {
        self.serialize_with(&mut rand::thread_rng())
    }

    pub fn serialize_with(&mut self, rng: &mut dyn RngCore) -> Vec<u8> {
        if !self.encrypted {
            return self.plain_bytes();
        }
        rng.fill_bytes(&mut self.footer.salt);
        let total =
            HEADER_SIZE + self.segments.len() * SEGMENT_SIZE + FOOTER_SIZE + TRAILER_SIZE;
        let mut out = Vec::with_capacity(total);
        self.header.write(&mut out);
        for segment in self.segments.iter() {
            segment.write(&mut out);
        }
        self.footer.write(&mut out);
        let signature = murmur3_32(&out, SIGNATURE_SEED);
        out.extend_from_slice(&signature.to_le_bytes());
        out
    }

    fn plain_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.segments.len() * PAYLOAD_SIZE);
        for segment in self.segments.iter() {
            out.extend_from_slice(&segment.payload[..]);
        }
        let length = (self.footer.decrypted_length.max(0) as usize).min(out.len());
        out.truncate(length);
        out
    }
}

/// Murmur3 32-bit hash; the container signature uses seed 0xFFFFFFFF over
/// every 32-bit word preceding the trailer.
pub fn murmur3_32(data: &[u8], seed: u32) -> u32 {
    const C1: u32 = 0xcc9e2d51;
    const C2: u32 = 0x1b873593;
    let mut h = seed;
    let mut chunks = data.chunks_exact(4);
    for chunk in &mut chunks {
        let mut b = [0u8; 4];
        b.copy_from_slice(chunk);
        let mut k = u32::from_le_bytes(b);
        k = k.wrapping_mul(C1).rotate_left(15).wrapping_mul(C2);
        h ^= k;
        h = h.rotate_left(13).wrapping_mul(5).wrapping_add(0xe6546b64);
    }
    let tail = chunks.remainder();
    if !tail.is_empty() {
        let mut k = 0u32;
        for (i, &b) in tail.iter().enumerate() {
            k |= (b as u32) << (8 * i);
        }
        k = k.wrapping_mul(C1).rotate_left(15).wrapping_mul(C2);
        h ^= k;
    }
    h ^= data.len() as u32;
    h ^= h >> 16;
    h = h.wrapping_mul(0x85ebca6b);
    h ^= h >> 13;
    h = h.wrapping_mul(0xc2b2ae35);
    h ^= h >> 16;
    h
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn sample_payload(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 31 + 7) as u8).collect()
    }

    fn encrypted_bytes(payload: &[u8], account_id: u32, rng_seed: u64) -> Vec<u8> {
        let mut rng = StdRng::seed_from_u64(rng_seed);
        let mut file = SaveFile::from_plain(payload);
        file.encrypt_with(account_id, &mut rng).unwrap();
        file.serialize_with(&mut rng)
    }

    #[test]
    fn test_plain_classification() {
        let file = SaveFile::parse(&sample_payload(5000)).unwrap();
        assert!(!file.is_encrypted());
        assert_eq!(file.segments.len(), 2);
        assert_eq!(file.footer.decrypted_length, 5000);
    }

    #[test]
    fn test_parse_container_rejects_bad_magic() {
        let mut bytes = encrypted_bytes(&sample_payload(4096), 1, 1);
        bytes[0] ^= 0xFF;
        let err = SaveFile::parse_container(&bytes).unwrap_err();
        assert!(matches!(err, LimeError::BadMagic(_)));
        // The public parse falls back to the plain classification.
        assert!(!SaveFile::parse(&bytes).unwrap().is_encrypted());
    }

    #[test]
    fn test_parse_container_rejects_bad_type() {
        let mut bytes = encrypted_bytes(&sample_payload(4096), 1, 1);
        bytes[8] = 0x11;
        let err = SaveFile::parse_container(&bytes).unwrap_err();
        assert!(matches!(err, LimeError::UnsupportedEncryption(0x11)));
    }

    #[test]
    fn test_parse_container_rejects_misaligned_segments() {
        let mut bytes = encrypted_bytes(&sample_payload(4096), 1, 1);
        bytes.pop();
        bytes.pop();
        bytes.pop();
        bytes.pop();
        bytes.pop();
        assert!(matches!(
            SaveFile::parse_container(&bytes).unwrap_err(),
            LimeError::MisalignedContainer(_)
        ));
    }

    #[test]
    fn test_encrypt_decrypt_round_trip() {
        let payload = sample_payload(10_000);
        let bytes = encrypted_bytes(&payload, 12345, 42);

        let mut file = SaveFile::parse(&bytes).unwrap();
        assert!(file.is_encrypted());
        assert_eq!(file.segments.len(), 3);
        file.decrypt(12345).unwrap();
        assert_eq!(file.serialize(), payload);
    }

    #[test]
    fn test_wrong_account_id_is_rejected() {
        let bytes = encrypted_bytes(&sample_payload(4096), 12345, 42);
        let mut file = SaveFile::parse(&bytes).unwrap();
        let before = file.segments[0].payload.clone();
        assert_eq!(file.decrypt(54321), Err(LimeError::WrongKey));
        // The failed attempt must not disturb the stored payload.
        assert_eq!(file.segments[0].payload, before);
        assert!(file.is_encrypted());
        file.decrypt(12345).unwrap();
    }

    #[test]
    fn test_decrypt_twice_is_an_error() {
        let bytes = encrypted_bytes(&sample_payload(100), 7, 3);
        let mut file = SaveFile::parse(&bytes).unwrap();
        file.decrypt(7).unwrap();
        assert!(matches!(file.decrypt(7), Err(LimeError::BadState(_))));
    }

    #[test]
    fn test_serialize_regenerates_salt() {
        let mut rng = StdRng::seed_from_u64(9);
        let mut file = SaveFile::from_plain(&sample_payload(256));
        file.encrypt_with(5, &mut rng).unwrap();
        let first = file.serialize_with(&mut rng);
        let second = file.serialize_with(&mut rng);
        let salt_offset = HEADER_SIZE + SEGMENT_SIZE;
        assert_ne!(
            first[salt_offset..salt_offset + FOOTER_SALT_SIZE],
            second[salt_offset..salt_offset + FOOTER_SALT_SIZE]
        );
    }

    #[test]
    fn test_trailing_signature_matches_contents() {
        let bytes = encrypted_bytes(&sample_payload(4096), 9, 4);
        let body = &bytes[..bytes.len() - TRAILER_SIZE];
        let expected = murmur3_32(body, SIGNATURE_SEED).to_le_bytes();
        assert_eq!(&bytes[bytes.len() - TRAILER_SIZE..], &expected);
    }

    #[test]
    fn test_murmur3_reference_vectors() {
        assert_eq!(murmur3_32(b"", 0), 0);
        assert_eq!(murmur3_32(b"", 1), 0x514E28B7);
        assert_eq!(murmur3_32(b"hello", 0), 0x248BFA47);
    }

    #[test]
    fn test_murmur3_seed_changes_hash() {
        let data = b"0123456789abcdef";
        assert_ne!(murmur3_32(data, 0), murmur3_32(data, SIGNATURE_SEED));
    }
}
