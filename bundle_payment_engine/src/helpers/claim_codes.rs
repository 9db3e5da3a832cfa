use rand::{distributions::Alphanumeric, Rng};

/// Generates a funding claim code of the form `XXXX-XXXX-XXXX`.
///
/// The code is the shared secret for one funding cycle, so it needs to be unguessable in practice but still easy
/// to read out over the phone. Twelve alphanumeric characters give ~71 bits, and the UNIQUE constraint on the
/// claims table catches the astronomically unlikely collision.
pub fn generate_claim_code() -> String {
    let chars: Vec<char> =
        rand::thread_rng().sample_iter(&Alphanumeric).take(12).map(|c| char::from(c).to_ascii_uppercase()).collect();
    chars.chunks(4).map(|block| block.iter().collect::<String>()).collect::<Vec<_>>().join("-")
}
