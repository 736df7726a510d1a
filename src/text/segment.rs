//! Grapheme-cluster segmentation.
//!
//! Length limits and character-level insertion must respect user-perceived
//! characters: combining marks, emoji ZWJ sequences, regional indicators.
//! Plain `char` iteration splits those apart and is never used here.

use unicode_segmentation::UnicodeSegmentation;

/// Split `text` into extended grapheme clusters, in order.
pub fn graphemes(text: &str) -> Vec<&str> {
    text.graphemes(true).collect()
}
