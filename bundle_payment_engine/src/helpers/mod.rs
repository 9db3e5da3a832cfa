mod claim_codes;
mod signing;

pub use claim_codes::generate_claim_code;
pub use signing::calculate_hmac;
