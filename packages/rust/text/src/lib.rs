//! Text processing for extracted page content.
//!
//! - [`collapse_whitespace`]: cleanup passes run on extracted page text
//! - [`TextNormalizer`]: stopword removal + lemmatization for the normalized
//!   form stored with each section

mod cleanup;
mod normalizer;

pub use cleanup::collapse_whitespace;
pub use normalizer::{TextNormalizer, lemmatize};
