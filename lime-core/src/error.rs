//! Error types for the Lime container engine.

use thiserror::Error;

/// Errors produced by the lime-core library.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LimeError {
    /// Container magic does not match the save-container signature.
    #[error("bad container magic 0x{0:08x}")]
    BadMagic(u32),

    /// Header carries an encryption type other than Lime (0x10).
    #[error("unsupported encryption type 0x{0:02x}")]
    UnsupportedEncryption(u32),

    /// File length does not decompose into header + whole segments + footer.
    #[error("container length {0} does not align to the segment grid")]
    MisalignedContainer(usize),

    /// Segment-0 checksum did not validate: the file is not compatible with
    /// the given account id.
    #[error("checksum mismatch, wrong account id")]
    WrongKey,

    /// A multiply/divide operand had the overflow flag bit set.
    #[error("wide integer operand overflow")]
    ArithmeticOverflow,

    /// The operation was canceled before it completed.
    #[error("operation canceled")]
    Canceled,

    /// The requested transform does not apply to the file's current state.
    #[error("{0}")]
    BadState(&'static str),
}

impl LimeError {
    /// Structural errors reject a single file, never an entire batch.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            LimeError::BadMagic(_)
                | LimeError::UnsupportedEncryption(_)
                | LimeError::MisalignedContainer(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_bad_magic() {
        let err = LimeError::BadMagic(0xdeadbeef);
        assert_eq!(format!("{}", err), "bad container magic 0xdeadbeef");
    }

    #[test]
    fn test_structural_classification() {
        assert!(LimeError::BadMagic(0).is_structural());
        assert!(LimeError::MisalignedContainer(17).is_structural());
        assert!(!LimeError::WrongKey.is_structural());
        assert!(!LimeError::Canceled.is_structural());
    }
}
