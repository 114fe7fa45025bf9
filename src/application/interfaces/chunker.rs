use crate::domain::{Chunk, CoreError, Language};

/// Decomposes one source file into named semantic chunks.
///
/// Implementations must be pure: the same bytes and grammar version yield
/// the same chunk sequence, so chunk ids are reproducible.
pub trait Chunker: Send + Sync {
    /// Chunk a file. `bytes` need not be valid UTF-8; invalid sequences
    /// are replaced and flagged with a warning.
    fn chunk_file(
        &self,
        file_path: &str,
        bytes: &[u8],
        language: Language,
    ) -> Result<Vec<Chunk>, CoreError>;

    fn supported_languages(&self) -> Vec<Language>;

    fn supports(&self, language: Language) -> bool {
        self.supported_languages().contains(&language)
    }
}
