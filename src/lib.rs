pub mod cipher;
pub mod constants;
pub mod double_cache;
pub mod error;
pub mod lcg;
pub mod payload;
pub mod permutation;
pub mod token;

pub use cipher::{KeySchedule, KeystreamCipher};
pub use double_cache::DoubleCache;
pub use error::TokenError;
pub use lcg::SeedGenerator;
pub use payload::{FieldMap, FieldValue, PayloadFields, SerializedPayload};
pub use permutation::PermutationState;
pub use token::{Token, TokenRequest, build_token};
