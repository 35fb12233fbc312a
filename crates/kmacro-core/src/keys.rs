//! Key strokes, modifier masks and Emacs-style key notation
//!
//! Notation accepted by [`KeyStroke::parse`]:
//!   H            - literal character (shift inferred for uppercase)
//!   C-x          - control + x
//!   M-f          - meta (alt/option) + f
//!   s-a          - super (command) + a
//!   C-M-<left>   - modifiers stack, special keys in angle brackets
//!   RET TAB SPC ESC DEL - named keys

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Key codes for keys that do not carry a printable character
pub mod key_codes {
    pub const BACKSPACE: u32 = 8;
    pub const TAB: u32 = 9;
    pub const RETURN: u32 = 13;
    pub const ESCAPE: u32 = 27;
    pub const SPACE: u32 = 32;
    pub const DELETE: u32 = 127;

    const SPECIAL: u32 = 0x0100_0000;
    pub const ARROW_UP: u32 = SPECIAL + 1;
    pub const ARROW_DOWN: u32 = SPECIAL + 2;
    pub const ARROW_LEFT: u32 = SPECIAL + 3;
    pub const ARROW_RIGHT: u32 = SPECIAL + 4;
    pub const PAGE_UP: u32 = SPECIAL + 5;
    pub const PAGE_DOWN: u32 = SPECIAL + 6;
    pub const HOME: u32 = SPECIAL + 7;
    pub const END: u32 = SPECIAL + 8;
    pub const INSERT: u32 = SPECIAL + 9;
    pub const F1: u32 = SPECIAL + 10;
    pub const F12: u32 = F1 + 11;

    pub(crate) const NAMED: &[(&str, u32)] = &[
        ("up", ARROW_UP),
        ("down", ARROW_DOWN),
        ("left", ARROW_LEFT),
        ("right", ARROW_RIGHT),
        ("prior", PAGE_UP),
        ("next", PAGE_DOWN),
        ("home", HOME),
        ("end", END),
        ("insert", INSERT),
        ("backspace", BACKSPACE),
        ("delete", DELETE),
    ];
}

/// Modifier flags packed into a single byte
/// Bit 0: shift, 1: ctrl, 2: meta/alt, 3: super/command
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Modifiers(pub u8);

impl Modifiers {
    pub const NONE: Modifiers = Modifiers(0);
    pub const SHIFT: u8 = 1 << 0;
    pub const CTRL: u8 = 1 << 1;
    pub const META: u8 = 1 << 2;
    pub const SUPER: u8 = 1 << 3;

    pub fn has_shift(&self) -> bool { self.0 & Self::SHIFT != 0 }
    pub fn has_ctrl(&self) -> bool { self.0 & Self::CTRL != 0 }
    pub fn has_meta(&self) -> bool { self.0 & Self::META != 0 }
    pub fn has_super(&self) -> bool { self.0 & Self::SUPER != 0 }

    /// Any modifier other than shift
    pub fn any_command_modifier(&self) -> bool {
        self.0 & (Self::CTRL | Self::META | Self::SUPER) != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyParseError {
    #[error("empty key designator")]
    Empty,
    #[error("unknown modifier '{0}'")]
    UnknownModifier(String),
    #[error("unknown key name '{0}'")]
    UnknownKey(String),
}

/// A raw keystroke as delivered by the host, before command dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeyStroke {
    pub code: u32,
    #[serde(default, skip_serializing_if = "Modifiers::is_empty")]
    pub modifiers: Modifiers,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub character: Option<char>,
}

impl KeyStroke {
    pub fn new(code: u32, modifiers: Modifiers, character: Option<char>) -> Self {
        Self { code, modifiers, character }
    }

    /// Keystroke that types `c`; uppercase letters carry shift
    pub fn from_char(c: char) -> Self {
        let mods = if c.is_uppercase() { Modifiers(Modifiers::SHIFT) } else { Modifiers::NONE };
        let code = c.to_lowercase().next().unwrap_or(c) as u32;
        Self::new(code, mods, Some(c))
    }

    /// Shift-only or unmodified key producing a printable character
    pub fn is_literal(&self) -> bool {
        !self.modifiers.any_command_modifier()
            && self.character.map_or(false, |c| !c.is_control())
    }

    /// Same physical key and modifiers, ignoring the produced character
    pub fn same_key(&self, code: u32, modifiers: Modifiers) -> bool {
        self.code == code && self.modifiers == modifiers
    }

    pub fn parse(s: &str) -> Result<Self, KeyParseError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(KeyParseError::Empty);
        }

        let mut mods = 0u8;
        let mut rest = s;
        // "C-" style prefixes; a lone "-" or a trailing "-" is the key itself
        while rest.len() > 2 && rest.as_bytes()[1] == b'-' {
            let bit = match &rest[..1] {
                "C" => Modifiers::CTRL,
                "M" => Modifiers::META,
                "s" => Modifiers::SUPER,
                "S" => Modifiers::SHIFT,
                other => return Err(KeyParseError::UnknownModifier(other.to_string())),
            };
            mods |= bit;
            rest = &rest[2..];
        }

        let (code, character) = match rest {
            "RET" => (key_codes::RETURN, Some('\r')),
            "TAB" => (key_codes::TAB, Some('\t')),
            "SPC" => (key_codes::SPACE, Some(' ')),
            "ESC" => (key_codes::ESCAPE, None),
            "DEL" => (key_codes::BACKSPACE, None),
            _ if rest.starts_with('<') && rest.ends_with('>') && rest.len() > 2 => {
                let name = &rest[1..rest.len() - 1];
                (named_code(name).ok_or_else(|| KeyParseError::UnknownKey(name.to_string()))?, None)
            }
            _ => {
                let mut chars = rest.chars();
                let c = chars.next().ok_or(KeyParseError::Empty)?;
                if chars.next().is_some() {
                    return Err(KeyParseError::UnknownKey(rest.to_string()));
                }
                if c.is_uppercase() {
                    mods |= Modifiers::SHIFT;
                }
                let code = c.to_lowercase().next().unwrap_or(c) as u32;
                (code, Some(c))
            }
        };

        Ok(Self::new(code, Modifiers(mods), character))
    }

    /// Parse a whitespace separated key sequence such as `C-x ( H i C-x )`
    pub fn parse_sequence(s: &str) -> Result<Vec<Self>, KeyParseError> {
        s.split_whitespace().map(Self::parse).collect()
    }
}

fn named_code(name: &str) -> Option<u32> {
    let lower = name.to_ascii_lowercase();
    if let Some(n) = lower.strip_prefix('f').and_then(|n| n.parse::<u32>().ok()) {
        if (1..=12).contains(&n) {
            return Some(key_codes::F1 + n - 1);
        }
    }
    key_codes::NAMED
        .iter()
        .find(|(n, _)| *n == lower)
        .map(|(_, code)| *code)
}

fn code_name(code: u32) -> Option<String> {
    match code {
        key_codes::RETURN => return Some("RET".into()),
        key_codes::TAB => return Some("TAB".into()),
        key_codes::SPACE => return Some("SPC".into()),
        key_codes::ESCAPE => return Some("ESC".into()),
        key_codes::BACKSPACE => return Some("DEL".into()),
        _ => {}
    }
    if (key_codes::F1..=key_codes::F12).contains(&code) {
        return Some(format!("<f{}>", code - key_codes::F1 + 1));
    }
    key_codes::NAMED
        .iter()
        .find(|(_, c)| *c == code)
        .map(|(n, _)| format!("<{}>", n))
}

impl fmt::Display for KeyStroke {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let m = self.modifiers;
        if m.has_ctrl() { f.write_str("C-")?; }
        if m.has_meta() { f.write_str("M-")?; }
        if m.has_super() { f.write_str("s-")?; }

        if let Some(name) = code_name(self.code) {
            if m.has_shift() { f.write_str("S-")?; }
            return f.write_str(&name);
        }

        match self.character {
            // shift is already visible in the character itself
            Some(c) if !c.is_control() => write!(f, "{}", c),
            _ => {
                if m.has_shift() { f.write_str("S-")?; }
                match char::from_u32(self.code) {
                    Some(c) if !c.is_control() => write!(f, "{}", c),
                    _ => write!(f, "<#{}>", self.code),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_literal_uppercase_sets_shift() {
        let k = KeyStroke::parse("H").unwrap();
        assert_eq!(k.code, 'h' as u32);
        assert!(k.modifiers.has_shift());
        assert_eq!(k.character, Some('H'));
        assert!(k.is_literal());
    }

    #[test]
    fn parse_control_key_is_not_literal() {
        let k = KeyStroke::parse("C-x").unwrap();
        assert_eq!(k.code, 'x' as u32);
        assert!(k.modifiers.has_ctrl());
        assert!(!k.is_literal());
    }

    #[test]
    fn parse_stacked_modifiers_and_named_keys() {
        let k = KeyStroke::parse("C-M-<left>").unwrap();
        assert_eq!(k.code, key_codes::ARROW_LEFT);
        assert!(k.modifiers.has_ctrl() && k.modifiers.has_meta());
        assert_eq!(KeyStroke::parse("<f5>").unwrap().code, key_codes::F1 + 4);
        assert!(!KeyStroke::parse("RET").unwrap().is_literal());
        assert!(KeyStroke::parse("SPC").unwrap().is_literal());
    }

    #[test]
    fn parse_minus_is_a_key() {
        let k = KeyStroke::parse("-").unwrap();
        assert_eq!(k.character, Some('-'));
        let k = KeyStroke::parse("C--").unwrap();
        assert_eq!(k.code, '-' as u32);
        assert!(k.modifiers.has_ctrl());
    }

    #[test]
    fn parse_errors() {
        assert_eq!(KeyStroke::parse(""), Err(KeyParseError::Empty));
        assert_eq!(
            KeyStroke::parse("Q-x"),
            Err(KeyParseError::UnknownModifier("Q".into()))
        );
        assert_eq!(
            KeyStroke::parse("<nope>"),
            Err(KeyParseError::UnknownKey("nope".into()))
        );
    }

    #[test]
    fn display_matches_notation() {
        for s in ["C-x", "M-f", "H", "!", "RET", "C-M-<left>", "<f5>", "s-a"] {
            assert_eq!(KeyStroke::parse(s).unwrap().to_string(), s);
        }
    }

    #[test]
    fn parse_sequence_splits_on_whitespace() {
        let keys = KeyStroke::parse_sequence("C-x ( H i").unwrap();
        assert_eq!(keys.len(), 4);
        assert_eq!(keys[1].character, Some('('));
    }
}
