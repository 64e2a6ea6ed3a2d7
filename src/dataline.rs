//! Header rewriting for message data lines.
//!
//! Every input line yields zero or more output lines. Only lines inside the
//! header block are inspected; the blank line ending the headers is where
//! `X-Spam` and `X-Spam-Class` get injected. Lines are bytes: anything not
//! rewritten goes back to smtpd exactly as it came in, whatever its encoding.

use crate::address::{parse_email_address, strip_plus_alias};
use crate::classes::Classifier;
use crate::error::FilterError;
use crate::session::Message;

const SPAM_SCORE_PREFIX: &[u8] = b"X-Spam-Score: ";
const SPAM_PREFIX: &[u8] = b"X-Spam: ";
const SPAM_CLASS_PREFIX: &[u8] = b"X-Spam-Class: ";
const TO_PREFIX: &[u8] = b"To: ";
const FROM_PREFIX: &[u8] = b"From: ";

/// Class label that turns `X-Spam` into `yes`.
pub const SPAM_CLASS_NAME: &str = "spam";

pub fn filter_data_line<C: Classifier + ?Sized>(
    event: &str,
    message: &mut Message,
    line: &[u8],
    classifier: &C,
) -> Result<Vec<Vec<u8>>, FilterError> {
    if !message.in_header {
        return Ok(vec![line.to_vec()]);
    }
    if line.iter().all(u8::is_ascii_whitespace) {
        message.in_header = false;
        return Ok(end_of_headers(event, message, line, classifier));
    }

    if line.starts_with(SPAM_SCORE_PREFIX) {
        message.spam_score = parse_spam_score(line)?;
        message.spam_score_set = true;
    } else if line.starts_with(SPAM_PREFIX) || line.starts_with(SPAM_CLASS_PREFIX) {
        // replaced at the end of the headers
        return Ok(Vec::new());
    } else if line.starts_with(TO_PREFIX) {
        if let Some(address) = header_address(event, line) {
            message.to.push(address);
        }
    } else if line.starts_with(FROM_PREFIX) {
        if let Some(address) = header_address(event, line) {
            message.from.push(address);
        }
    }
    Ok(vec![line.to_vec()])
}

/// `X-Spam-Score: 1.155 / 100` yields 1.155.
///
/// The score must fit a single-precision float; anything larger is
/// rejected rather than turned into infinity.
fn parse_spam_score(line: &[u8]) -> Result<f64, FilterError> {
    let text = String::from_utf8_lossy(line);
    let value = text
        .split(' ')
        .nth(1)
        .ok_or_else(|| FilterError::SpamScore(text.to_string()))?;
    let score = value
        .parse::<f32>()
        .map_err(|e| FilterError::SpamScore(format!("{text}: {e}")))?;
    if score.is_infinite() && value.parse::<f64>().map_or(false, f64::is_finite) {
        return Err(FilterError::SpamScore(format!("{text}: value out of range")));
    }
    Ok(f64::from(score))
}

fn header_address(event: &str, line: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(line);
    let (_, value) = text.split_once(' ')?;
    match parse_email_address(value) {
        Ok(address) => Some(address),
        Err(e) => {
            log::warn!("{event}: {e} in header line: {text}");
            None
        }
    }
}

fn end_of_headers<C: Classifier + ?Sized>(
    event: &str,
    message: &Message,
    line: &[u8],
    classifier: &C,
) -> Vec<Vec<u8>> {
    let mut output = vec![line.to_vec()];

    if log::log_enabled!(log::Level::Debug) {
        match serde_json::to_string(message) {
            Ok(json) => log::debug!("{event}: generating headers for message: {json}"),
            Err(e) => log::debug!("{event}: generating headers for message {}: {e}", message.id),
        }
    }

    if !message.spam_score_set {
        log::warn!("{event}: X-Spam-Score header not found");
        return output;
    }
    let Some(to) = message.to.first() else {
        log::warn!("{event}: missing To address");
        return output;
    };
    let Some(envelope_to) = message.envelope_to.first() else {
        log::warn!("{event}: missing EnvelopeTo address");
        return output;
    };
    if envelope_to != to {
        log::warn!("{event}: envelopeTo ({envelope_to}) mismatches initial To ({to})");
    }

    let Some(address) = strip_plus_alias(to) else {
        log::warn!("{event}: '@' not found in To address: {to}");
        return output;
    };

    let candidates = vec![address];
    let spam_class = classifier.get_class(&candidates, message.spam_score);
    log::debug!(
        "{event}: get_class({candidates:?}, {}) returned '{spam_class}'",
        message.spam_score
    );
    if !spam_class.is_empty() {
        output.insert(0, header_line(SPAM_CLASS_PREFIX, &spam_class));
    }

    let spam_state = if spam_class == SPAM_CLASS_NAME { "yes" } else { "no" };
    output.insert(0, header_line(SPAM_PREFIX, spam_state));

    log::info!(
        "{event}: address={} score={} class='{spam_class}' spam={spam_state}",
        candidates[0],
        message.spam_score
    );
    output
}

fn header_line(prefix: &[u8], value: &str) -> Vec<u8> {
    let mut line = prefix.to_vec();
    line.extend_from_slice(value.as_bytes());
    line
}
