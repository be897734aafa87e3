//! Sample-level audio handling: encodings, the codec and the WAV container

mod codec;
mod container;
mod format;

pub use codec::{
    alaw_to_linear, decode, encode, encode_into, linear_to_alaw, linear_to_mulaw,
    mulaw_to_linear, DecodedBuffer, PayloadError,
};
pub use container::{wav_header, ContainerSummary, ContainerWriter, WAV_HEADER_LEN};
pub use format::{Encoding, SessionFormat, SUPPORTED_SAMPLE_RATES};
pub(crate) use format::samples_to_duration;
