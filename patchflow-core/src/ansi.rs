//! Terminal escape stripping
//!
//! External tools colorize their output when they think they are talking to a
//! terminal. Captured text is passed through [`strip`] before it is logged or
//! stored so that stored logs and error excerpts are plain text.
//!
//! Recognized sequences:
//! - CSI: `ESC [` (or the 8-bit `U+009B`) followed by parameter and
//!   intermediate bytes and a final byte
//! - String commands (OSC, DCS, SOS, PM, APC): `ESC ]`, `ESC P`, `ESC X`,
//!   `ESC ^`, `ESC _`, terminated by BEL or `ESC \`
//! - nF sequences: `ESC` followed by intermediate bytes and a final byte
//! - Fe/Fp/Fs two-byte sequences: `ESC` followed by any byte in `0x30..=0x7E`
//!
//! Every `ESC` and `U+009B` in the input is consumed, so the output never
//! contains one and stripping is idempotent.

use std::iter::Peekable;
use std::str::Chars;

const ESC: char = '\u{1b}';
const BEL: char = '\u{07}';
const CSI_8BIT: char = '\u{9b}';

/// Removes terminal control sequences from `input`
pub fn strip(input: &str) -> String {
    if !input.contains([ESC, CSI_8BIT]) {
        return input.to_string();
    }

    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            ESC => skip_escape(&mut chars),
            CSI_8BIT => skip_csi(&mut chars),
            _ => out.push(c),
        }
    }

    out
}

/// Skips the remainder of a sequence whose leading `ESC` was consumed
fn skip_escape(chars: &mut Peekable<Chars<'_>>) {
    let Some(&next) = chars.peek() else {
        return;
    };

    match next {
        '[' => {
            chars.next();
            skip_csi(chars);
        }
        ']' | 'P' | 'X' | '^' | '_' => {
            chars.next();
            skip_string_command(chars);
        }
        '\u{20}'..='\u{2f}' => {
            while chars.next_if(|c| matches!(c, '\u{20}'..='\u{2f}')).is_some() {}
            chars.next_if(|c| matches!(c, '\u{30}'..='\u{7e}'));
        }
        '\u{30}'..='\u{7e}' => {
            chars.next();
        }
        // Lone ESC before ordinary text; drop just the ESC.
        _ => {}
    }
}

/// Skips parameters, intermediates and the final byte of a CSI sequence
///
/// A byte that cannot belong to the sequence ends it without being consumed.
fn skip_csi(chars: &mut Peekable<Chars<'_>>) {
    while chars.next_if(|c| matches!(c, '\u{30}'..='\u{3f}')).is_some() {}
    while chars.next_if(|c| matches!(c, '\u{20}'..='\u{2f}')).is_some() {}
    chars.next_if(|c| matches!(c, '\u{40}'..='\u{7e}'));
}

/// Skips the body of a string command up to and including its terminator
fn skip_string_command(chars: &mut Peekable<Chars<'_>>) {
    while let Some(c) = chars.next() {
        match c {
            BEL => return,
            ESC => {
                if chars.next_if_eq(&'\\').is_some() {
                    return;
                }
            }
            _ => {}
        }
    }
}
