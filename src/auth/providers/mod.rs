// Identity providers for upstream accounts

pub mod antigravity;

pub use antigravity::{AntigravityOAuth, TokenRefresher, TokenResponse};
