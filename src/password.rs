//! Password generation for users registered without one.
use rand::rngs::OsRng;
use rand::RngCore;

pub const PASSWORD_LEN: usize = 16;

const ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz23456789";

/// Bytes at or above this bound are discarded so every symbol is equally likely.
const ACCEPT_BELOW: u8 = (256 - 256 % ALPHABET.len()) as u8;

/// Generates a password from the operating system's CSPRNG, falling back to
/// a non-cryptographic generator when the OS source is unavailable.
pub fn generate() -> String {
    match generate_with(|buf| OsRng.try_fill_bytes(buf)) {
        Ok(password) => password,
        Err(err) => {
            log::warn!("OS random source unavailable ({}), using weaker generator", err);
            generate_weak()
        }
    }
}

/// Draws bytes from `fill` until enough of them map onto the alphabet.
fn generate_with<F, E>(mut fill: F) -> Result<String, E>
where
    F: FnMut(&mut [u8]) -> Result<(), E>,
{
    let mut password = String::with_capacity(PASSWORD_LEN);
    let mut raw = [0u8; PASSWORD_LEN];
    while password.len() < PASSWORD_LEN {
        fill(&mut raw)?;
        let wanted = PASSWORD_LEN - password.len();
        password.extend(raw.iter().filter_map(|b| symbol(*b)).take(wanted));
    }
    Ok(password)
}

fn symbol(byte: u8) -> Option<char> {
    (byte < ACCEPT_BELOW).then(|| ALPHABET[byte as usize % ALPHABET.len()] as char)
}

fn generate_weak() -> String {
    let rng = fastrand::Rng::new();
    (0..PASSWORD_LEN)
        .map(|_| ALPHABET[rng.usize(..ALPHABET.len())] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::convert::Infallible;

    #[test]
    fn test_generate_shape() {
        let password = generate();
        assert_eq!(password.len(), PASSWORD_LEN);
        assert!(password.bytes().all(|b| ALPHABET.contains(&b)));
        assert!(crate::registry::validate_password(&password).is_ok());
    }

    #[test]
    fn test_generate_differs() {
        assert_ne!(generate(), generate());
    }

    #[test]
    fn test_accepted_bytes_cover_alphabet_evenly() {
        let mut counts: HashMap<char, usize> = HashMap::new();
        for byte in 0..=u8::MAX {
            if let Some(c) = symbol(byte) {
                *counts.entry(c).or_default() += 1;
            }
        }
        assert_eq!(counts.len(), ALPHABET.len());
        let per_symbol = ACCEPT_BELOW as usize / ALPHABET.len();
        assert!(counts.values().all(|n| *n == per_symbol), "{:?}", counts);
        assert_eq!(symbol(ACCEPT_BELOW), None);
        assert_eq!(symbol(u8::MAX), None);
    }

    #[test]
    fn test_rejected_bytes_are_redrawn() {
        let mut calls = 0;
        let password = generate_with(|buf: &mut [u8]| {
            calls += 1;
            let first = if calls == 1 { u8::MAX } else { 0 };
            for (i, b) in buf.iter_mut().enumerate() {
                *b = if i % 2 == 0 { first } else { i as u8 };
            }
            Ok::<(), Infallible>(())
        })
        .unwrap();

        assert_eq!(calls, 2);
        assert_eq!(password.len(), PASSWORD_LEN);
        // first draw keeps only the odd positions; the second fills the rest
        assert!(password.starts_with("BDFHKMPR"));
    }

    #[test]
    fn test_fill_error_is_returned() {
        let result = generate_with(|_: &mut [u8]| Err("unavailable"));
        assert_eq!(result, Err("unavailable"));
    }

    #[test]
    fn test_weak_fallback_stays_in_alphabet() {
        let password = generate_weak();
        assert_eq!(password.len(), PASSWORD_LEN);
        assert!(password.bytes().all(|b| ALPHABET.contains(&b)));
    }
}
