use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Compression error: {0}")]
    Compression(String),

    #[error("Decompression error: {0}")]
    Decompression(String),

    #[error("Unknown compression codec: {0}")]
    UnknownCodec(String),

    #[error("Decompressed size {0} exceeds maximum {1}")]
    PayloadTooLarge(usize, usize),
}

pub type Result<T> = std::result::Result<T, Error>;
