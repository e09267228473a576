//! Image generation backends.

#[cfg(feature = "freepik")]
mod freepik;
#[cfg(feature = "huggingface")]
mod huggingface;
#[cfg(feature = "pollinations")]
mod pollinations;

#[cfg(feature = "freepik")]
pub use freepik::{FreepikProvider, FreepikProviderBuilder, MysticModel};

#[cfg(feature = "huggingface")]
pub use huggingface::{HuggingFaceModel, HuggingFaceProvider, HuggingFaceProviderBuilder};

#[cfg(feature = "pollinations")]
pub use pollinations::{PollinationsProvider, PollinationsProviderBuilder};
