//! ABI decoding for market contract logs.
//!
//! Only the shapes the market contracts emit are supported: indexed
//! addresses and integers in topics, static `uint256` words and a single
//! dynamic `uint256[]` in the data section.

use rust_decimal::Decimal;

use super::error::ChainError;
use super::{EventKind, MarketEvent};

/// Size of an ABI word in bytes.
pub const WORD_SIZE: usize = 32;

/// A single 32-byte ABI word.
pub type Word = [u8; WORD_SIZE];

/// Raw log fields needed for decoding.
#[derive(Debug, Clone, Copy)]
pub struct RawLogData<'a> {
    /// Topics, topic0 first.
    pub topics: &'a [String],
    /// Hex-encoded data section.
    pub data: &'a str,
}

/// Decodes a `0x`-prefixed hex quantity such as a block number.
///
/// # Errors
///
/// Returns [`ChainError::Decode`] if the value is not valid hex.
pub fn parse_quantity(value: &str) -> Result<u64, ChainError> {
    let digits = strip_prefix(value);
    if digits.is_empty() {
        return Err(ChainError::Decode(format!("empty quantity: {value:?}")));
    }
    u64::from_str_radix(digits, 16)
        .map_err(|e| ChainError::Decode(format!("invalid quantity {value:?}: {e}")))
}

/// Encodes a block number as a hex quantity.
#[must_use]
pub fn encode_quantity(value: u64) -> String {
    format!("0x{value:x}")
}

/// Decodes a hex string into bytes.
///
/// # Errors
///
/// Returns [`ChainError::Decode`] on odd length or non-hex characters.
pub fn decode_hex(value: &str) -> Result<Vec<u8>, ChainError> {
    let digits = strip_prefix(value);
    if digits.len() % 2 != 0 {
        return Err(ChainError::Decode(format!(
            "odd-length hex string ({} digits)",
            digits.len()
        )));
    }
    digits
        .as_bytes()
        .chunks(2)
        .map(|pair| {
            std::str::from_utf8(pair)
                .ok()
                .and_then(|s| u8::from_str_radix(s, 16).ok())
                .ok_or_else(|| ChainError::Decode(format!("invalid hex byte in {value:?}")))
        })
        .collect()
}

/// Splits a data section into ABI words.
///
/// # Errors
///
/// Returns [`ChainError::Decode`] if the data is not word aligned.
pub fn decode_words(data: &str) -> Result<Vec<Word>, ChainError> {
    let bytes = decode_hex(data)?;
    if bytes.len() % WORD_SIZE != 0 {
        return Err(ChainError::Decode(format!(
            "data length {} is not a multiple of {WORD_SIZE}",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(WORD_SIZE)
        .map(|chunk| {
            let mut word = [0u8; WORD_SIZE];
            word.copy_from_slice(chunk);
            word
        })
        .collect())
}

/// Interprets a word as an unsigned integer that fits in 128 bits.
///
/// # Errors
///
/// Returns [`ChainError::Decode`] if the high 16 bytes are not zero.
pub fn word_to_u128(word: &Word) -> Result<u128, ChainError> {
    let (high, low) = word.split_at(16);
    if high.iter().any(|b| *b != 0) {
        return Err(ChainError::Decode("uint256 value exceeds 128 bits".to_string()));
    }
    let mut buf = [0u8; 16];
    buf.copy_from_slice(low);
    Ok(u128::from_be_bytes(buf))
}

/// Interprets a word as a token amount.
///
/// # Errors
///
/// Returns [`ChainError::Decode`] if the value does not fit a decimal.
pub fn word_to_decimal(word: &Word) -> Result<Decimal, ChainError> {
    let value = word_to_u128(word)?;
    let signed = i128::try_from(value)
        .map_err(|_| ChainError::Decode("amount exceeds decimal range".to_string()))?;
    Decimal::try_from_i128_with_scale(signed, 0)
        .map_err(|e| ChainError::Decode(format!("amount exceeds decimal range: {e}")))
}

/// Interprets a word as an outcome index.
///
/// # Errors
///
/// Returns [`ChainError::Decode`] if the value exceeds `u32`.
pub fn word_to_index(word: &Word) -> Result<u32, ChainError> {
    let value = word_to_u128(word)?;
    u32::try_from(value).map_err(|_| ChainError::Decode(format!("outcome index {value} too large")))
}

/// Interprets an indexed topic as an address (last 20 bytes, lower-case).
///
/// # Errors
///
/// Returns [`ChainError::Decode`] if the topic is not a full word.
pub fn topic_to_address(topic: &str) -> Result<String, ChainError> {
    let bytes = decode_hex(topic)?;
    let tail = bytes
        .len()
        .checked_sub(20)
        .filter(|_| bytes.len() == WORD_SIZE)
        .and_then(|start| bytes.get(start..))
        .ok_or_else(|| ChainError::Decode(format!("topic is not a 32-byte word: {topic}")))?;
    let hex: String = tail.iter().map(|b| format!("{b:02x}")).collect();
    Ok(format!("0x{hex}"))
}

/// Interprets an indexed topic as a word.
///
/// # Errors
///
/// Returns [`ChainError::Decode`] if the topic is not a full word.
pub fn topic_to_word(topic: &str) -> Result<Word, ChainError> {
    let words = decode_words(topic)?;
    match words.as_slice() {
        [word] => Ok(*word),
        _ => Err(ChainError::Decode(format!("topic is not a 32-byte word: {topic}"))),
    }
}

/// Decodes the dynamic `uint256[]` whose head offset is stored at
/// `head_slot`.
///
/// # Errors
///
/// Returns [`ChainError::Decode`] on out-of-range offsets or lengths.
pub fn decode_amount_array(words: &[Word], head_slot: usize) -> Result<Vec<Decimal>, ChainError> {
    let offset = word(words, head_slot)
        .and_then(word_to_u128)
        .and_then(|v| usize::try_from(v).map_err(|_| ChainError::Decode("offset".to_string())))?;
    if offset % WORD_SIZE != 0 {
        return Err(ChainError::Decode(format!("unaligned array offset {offset}")));
    }
    let len_slot = offset / WORD_SIZE;
    let len = word(words, len_slot)
        .and_then(word_to_u128)
        .and_then(|v| usize::try_from(v).map_err(|_| ChainError::Decode("length".to_string())))?;

    (0..len)
        .map(|i| word(words, len_slot + 1 + i).and_then(word_to_decimal))
        .collect()
}

/// Decodes a log of a known kind into a typed event.
///
/// # Errors
///
/// Returns [`ChainError::Decode`] if the topics or data do not match the
/// event layout.
pub fn decode_event(kind: EventKind, raw: RawLogData<'_>) -> Result<MarketEvent, ChainError> {
    let words = decode_words(raw.data)?;
    let wallet = topic_to_address(topic(raw.topics, 1)?)?;

    let event = match kind {
        EventKind::FundingAdded => MarketEvent::FundingAdded {
            funder: wallet,
            amounts_added: decode_amount_array(&words, 0)?,
            shares_minted: word(&words, 1).and_then(word_to_decimal)?,
        },
        EventKind::FundingRemoved => MarketEvent::FundingRemoved {
            funder: wallet,
            amounts_removed: decode_amount_array(&words, 0)?,
            collateral_removed: word(&words, 1).and_then(word_to_decimal)?,
            shares_burnt: word(&words, 2).and_then(word_to_decimal)?,
        },
        EventKind::Buy => MarketEvent::Buy {
            buyer: wallet,
            investment_amount: word(&words, 0).and_then(word_to_decimal)?,
            fee_amount: word(&words, 1).and_then(word_to_decimal)?,
            outcome_index: word_to_index(&topic_to_word(topic(raw.topics, 2)?)?)?,
            outcome_tokens_bought: word(&words, 2).and_then(word_to_decimal)?,
        },
        EventKind::Sell => MarketEvent::Sell {
            seller: wallet,
            return_amount: word(&words, 0).and_then(word_to_decimal)?,
            fee_amount: word(&words, 1).and_then(word_to_decimal)?,
            outcome_index: word_to_index(&topic_to_word(topic(raw.topics, 2)?)?)?,
            outcome_tokens_sold: word(&words, 2).and_then(word_to_decimal)?,
        },
        EventKind::Claim => MarketEvent::Claim {
            redeemer: wallet,
            payout: word(&words, 0).and_then(word_to_decimal)?,
        },
    };

    Ok(event)
}

fn strip_prefix(value: &str) -> &str {
    value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .unwrap_or(value)
}

fn word(words: &[Word], slot: usize) -> Result<&Word, ChainError> {
    words
        .get(slot)
        .ok_or_else(|| ChainError::Decode(format!("missing data word {slot}")))
}

fn topic(topics: &[String], slot: usize) -> Result<&str, ChainError> {
    topics
        .get(slot)
        .map(String::as_str)
        .ok_or_else(|| ChainError::Decode(format!("missing topic {slot}")))
}
