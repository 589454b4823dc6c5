//! Output validation against required/forbidden text markers.

use tracing::{debug, warn};

/// Check a captured output string against marker lists.
///
/// `required_any_of` entries are validity indicators, not pass
/// conditions: finding any one of them marks the output valid. Any
/// `forbidden_any_of` marker found afterwards flips the outcome back to
/// invalid, so forbidden always wins over required.
///
/// With both marker lists empty, only an empty output string validates.
///
/// Pure function; its only side effect is diagnostic logging of which
/// marker matched.
pub fn validate<R, F>(text: &str, required_any_of: &[R], forbidden_any_of: &[F]) -> bool
where
    R: AsRef<str>,
    F: AsRef<str>,
{
    let mut valid = false;

    if required_any_of.is_empty() && forbidden_any_of.is_empty() && text.is_empty() {
        // No validation criteria and nothing to validate: assume success.
        valid = true;
    } else {
        for marker in required_any_of {
            if text.contains(marker.as_ref()) {
                debug!("required marker {:?} found in output", marker.as_ref());
                valid = true;
                break;
            }
        }

        for marker in forbidden_any_of {
            if text.contains(marker.as_ref()) {
                warn!("forbidden marker {:?} found in output", marker.as_ref());
                valid = false;
                break;
            }
        }
    }

    valid
}
