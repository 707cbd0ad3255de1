mod clahe;
pub mod convert_color;
pub mod denoise;
pub mod mask;
#[cfg(feature = "opencv")]
pub mod opencv;
mod sharpen;
mod white_balance;

pub use clahe::{clahe, clahe_lab};
pub use denoise::{denoise_colored, NlMeansParams};
pub use sharpen::unsharp_mask;
pub use white_balance::gray_world;
