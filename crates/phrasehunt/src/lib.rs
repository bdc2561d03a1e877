#[cfg(feature = "bitcoin")]
mod bip44;
mod checkpoint;
mod crypto;
pub mod decimal;
mod error;
mod indexer;
mod progress;
mod range;
mod rate;
mod session;
mod space;
mod wordlist;
mod worker;

#[cfg(feature = "bitcoin")]
pub use crate::bip44::*;
pub use crate::checkpoint::*;
pub use crate::crypto::*;
pub use crate::error::*;
pub use crate::indexer::*;
pub use crate::progress::*;
pub use crate::range::*;
pub use crate::rate::*;
pub use crate::session::*;
pub use crate::space::*;
pub use crate::wordlist::*;
pub use crate::worker::*;
