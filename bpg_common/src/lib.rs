mod money;

pub mod op;
mod secret;

pub use money::{Cedis, CedisConversionError, CEDI_CURRENCY_CODE, CEDI_CURRENCY_CODE_LOWER};
pub use secret::Secret;
