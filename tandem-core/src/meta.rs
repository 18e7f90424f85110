//! Per-character style metadata.
//!
//! Every field is tri-state: `None` means "not touched by this op", which is
//! distinct from an explicit `Some(false)` / `Some(0)`. Retains use the
//! unset state to change only some attributes of the text they span.

use serde::{Deserialize, Serialize};

/// Identifier of a registered or guest user. `0` is reserved for the system.
pub type UserId = u32;

/// Style and attribution of a run of characters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StyleMeta {
    pub bold: Option<bool>,
    pub italic: Option<bool>,
    pub underline: Option<bool>,
    pub strike: Option<bool>,
    pub font_size: Option<u32>,
    /// User the text is attributed to.
    pub author: Option<UserId>,
}

impl StyleMeta {
    /// Metadata with every field unset.
    pub const EMPTY: StyleMeta = StyleMeta {
        bold: None,
        italic: None,
        underline: None,
        strike: None,
        font_size: None,
        author: None,
    };

    pub fn is_empty(&self) -> bool {
        *self == Self::EMPTY
    }

    pub fn with_bold(mut self, bold: bool) -> Self {
        self.bold = Some(bold);
        self
    }

    pub fn with_italic(mut self, italic: bool) -> Self {
        self.italic = Some(italic);
        self
    }

    pub fn with_underline(mut self, underline: bool) -> Self {
        self.underline = Some(underline);
        self
    }

    pub fn with_strike(mut self, strike: bool) -> Self {
        self.strike = Some(strike);
        self
    }

    pub fn with_font_size(mut self, font_size: u32) -> Self {
        self.font_size = Some(font_size);
        self
    }

    pub fn with_author(mut self, author: UserId) -> Self {
        self.author = Some(author);
        self
    }

    /// `base` with every field set in `self` replaced by its value.
    pub fn overlay(&self, base: &StyleMeta) -> StyleMeta {
        StyleMeta {
            bold: self.bold.or(base.bold),
            italic: self.italic.or(base.italic),
            underline: self.underline.or(base.underline),
            strike: self.strike.or(base.strike),
            font_size: self.font_size.or(base.font_size),
            author: self.author.or(base.author),
        }
    }

    /// `base` with every field set in `self` cleared.
    pub fn complement(&self, base: &StyleMeta) -> StyleMeta {
        StyleMeta {
            bold: base.bold.filter(|_| self.bold.is_none()),
            italic: base.italic.filter(|_| self.italic.is_none()),
            underline: base.underline.filter(|_| self.underline.is_none()),
            strike: base.strike.filter(|_| self.strike.is_none()),
            font_size: base.font_size.filter(|_| self.font_size.is_none()),
            author: base.author.filter(|_| self.author.is_none()),
        }
    }

    /// The fields set in `self`, carrying the values `base` had for them.
    ///
    /// Style fields unset in `base` come back as their defaults; an unset
    /// author stays unset since there is no user to restore.
    pub fn invert(&self, base: &StyleMeta) -> StyleMeta {
        StyleMeta {
            bold: self.bold.map(|_| base.bold.unwrap_or_default()),
            italic: self.italic.map(|_| base.italic.unwrap_or_default()),
            underline: self.underline.map(|_| base.underline.unwrap_or_default()),
            strike: self.strike.map(|_| base.strike.unwrap_or_default()),
            font_size: self.font_size.map(|_| base.font_size.unwrap_or_default()),
            author: self.author.and(base.author),
        }
    }

    /// Every style field explicitly set, defaulting the unset ones.
    ///
    /// Inserted text is stored materialized so that [`StyleMeta::invert`]
    /// always finds a concrete value to restore.
    pub fn materialized(&self) -> StyleMeta {
        StyleMeta {
            bold: Some(self.bold.unwrap_or_default()),
            italic: Some(self.italic.unwrap_or_default()),
            underline: Some(self.underline.unwrap_or_default()),
            strike: Some(self.strike.unwrap_or_default()),
            font_size: Some(self.font_size.unwrap_or_default()),
            author: self.author,
        }
    }
}
