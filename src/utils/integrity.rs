use base64::{prelude::BASE64_STANDARD, Engine};
use sha2::{Digest, Sha256, Sha384, Sha512};

fn digest(algorithm: &str, data: &[u8]) -> Option<String> {
    let hash = match algorithm.to_ascii_lowercase().as_str() {
        "sha256" => Sha256::digest(data).to_vec(),
        "sha384" => Sha384::digest(data).to_vec(),
        "sha512" => Sha512::digest(data).to_vec(),
        _ => return None,
    };
    Some(BASE64_STANDARD.encode(hash))
}

/// Checks `data` against an `integrity` attribute value. The value may
/// list several `<alg>-<base64>` tokens; one match is enough. A value
/// without any supported token does not restrict the data.
pub fn check_integrity(data: &[u8], integrity: &str) -> bool {
    let mut supported = false;

    for token in integrity.split_ascii_whitespace() {
        let Some((algorithm, expected)) = token.split_once('-') else {
            continue;
        };
        // Options after `?` are reserved
        let expected = expected.split('?').next().unwrap_or(expected);
        if let Some(actual) = digest(algorithm, data) {
            supported = true;
            if actual == expected {
                return true;
            }
        }
    }

    !supported
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_any_listed_hash() {
        let data = b"body{}";
        let sha256 = format!("sha256-{}", BASE64_STANDARD.encode(Sha256::digest(data)));
        let sha512 = format!("sha512-{}", BASE64_STANDARD.encode(Sha512::digest(data)));

        assert!(check_integrity(data, &sha256));
        assert!(check_integrity(data, &format!("sha384-AAAA {}", sha512)));
        assert!(!check_integrity(data, "sha256-AAAA"));
        assert!(!check_integrity(b"other", &sha256));
    }

    #[test]
    fn unsupported_metadata_does_not_restrict() {
        assert!(check_integrity(b"x", "md5-AAAA"));
        assert!(check_integrity(b"x", ""));
    }
}
