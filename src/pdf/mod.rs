//! PDF layer
//!
//! Page range handling and the qpdf-backed library path.

pub mod page_range;
mod qpdf;

pub use page_range::{expand_all, parse_page_range, per_file, to_expr, PageRange, PageToken};
pub use qpdf::QpdfWrapper;
