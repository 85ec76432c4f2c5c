//! Table artifacts: delimited-text parsing and bounded previews of CSV/TSV files.

mod parse;
mod preview;

pub use parse::{build_preview, parse_line, sniff_delimiter, TablePreview, MAX_PREVIEW_COLUMNS, MAX_PREVIEW_ROWS};
pub use preview::{load_preview, ArtifactFetcher, HttpArtifactFetcher, PreviewError};
