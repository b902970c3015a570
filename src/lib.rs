#![warn(
    unused_extern_crates,
    missing_debug_implementations,
    rust_2018_idioms,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::fallible_impl_from,
    clippy::dbg_macro
)]
#![forbid(unsafe_code)]

pub mod config;
pub mod confidence;
pub mod engine;
pub mod error;
pub mod explorer;
pub mod fee;
pub mod gateway;
pub mod htlc;
pub mod keyring;
pub mod secret;
pub mod swap;

use conquer_once::Lazy;

pub use engine::BitcoinSwap;
pub use error::SwapError;
pub use htlc::ScriptValues;
pub use secret::{RefundFiller, Secret, SecretHash};
pub use swap::{ExpectedScript, Funded, LedgerSwap, Spent};

pub static SECP: Lazy<::bitcoin::secp256k1::Secp256k1<::bitcoin::secp256k1::All>> =
    Lazy::new(::bitcoin::secp256k1::Secp256k1::new);
