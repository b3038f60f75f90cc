//! Document parsing.
//!
//! A [`DocumentParser`] turns the text of one source file into a [`Node`] and back. Parsers are
//! registered per file extension in a [`ParserMap`]; the sync engine only considers files whose
//! extension has a parser, and the watcher filters events the same way.
//!
//! ## Built-in Parsers
//!
//! - **Markdown** (`.md`) - via [`md::MarkdownParser`]
//!
//! Register custom parsers via [`ParserMap::insert`]:
//!
//! ```rust
//! use roux_core::{codec::{DocumentParser, ParseContext, ParserMap}, properties::Node, RouxError};
//! use std::sync::Arc;
//!
//! struct PlainText;
//!
//! impl DocumentParser for PlainText {
//!     fn parse(&self, content: &str, ctx: &ParseContext<'_>) -> Result<Node, RouxError> {
//!         Ok(Node {
//!             id: ctx.provisional_id(),
//!             title: ctx.stem(),
//!             content: content.to_string(),
//!             source_ref: Some(ctx.source_ref()),
//!             ..Default::default()
//!         })
//!     }
//!
//!     fn serialize(&self, node: &Node) -> Result<String, RouxError> {
//!         Ok(node.content.clone())
//!     }
//!
//!     fn write_id(&self, _content: &str, _id: &str) -> Result<Option<String>, RouxError> {
//!         Ok(None)
//!     }
//! }
//!
//! let parsers = ParserMap::create("md");
//! parsers.insert("txt", Arc::new(PlainText));
//! assert!(parsers.extensions().contains(&"txt".to_string()));
//! ```

use parking_lot::RwLock;
use std::{collections::BTreeMap, path::Path, sync::Arc};

use crate::{
    error::RouxError,
    properties::{Node, SourceKind, SourceRef},
};

pub mod md;

/// Everything a parser knows about the file besides its text.
#[derive(Debug, Clone, Copy)]
pub struct ParseContext<'a> {
    pub absolute_path: &'a Path,
    /// Forward-slash path relative to the source root, original case.
    pub relative_path: &'a str,
    /// Lowercased, without the dot.
    pub extension: &'a str,
    /// Modification time in epoch milliseconds.
    pub mtime: i64,
}

impl ParseContext<'_> {
    /// Id used until a stable one has been written into the document: the lowercased relative
    /// path.
    pub fn provisional_id(&self) -> String {
        self.relative_path.to_lowercase()
    }

    /// File name without its extension.
    pub fn stem(&self) -> String {
        self.absolute_path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default()
    }

    pub fn source_ref(&self) -> SourceRef {
        SourceRef {
            kind: SourceKind::File,
            path: self.absolute_path.to_path_buf(),
            last_modified: self.mtime,
        }
    }
}

pub trait DocumentParser: Send + Sync {
    /// Parse `content`. Links are returned raw (normalized text); resolving them to ids is the
    /// caller's job. Documents without a stored id get [`ParseContext::provisional_id`].
    fn parse(&self, content: &str, ctx: &ParseContext<'_>) -> Result<Node, RouxError>;

    /// Render a node as file content.
    fn serialize(&self, node: &Node) -> Result<String, RouxError>;

    /// Return `content` with `id` stored in it, leaving everything else as it was. `None` means
    /// the format has nowhere to store an id.
    fn write_id(&self, content: &str, id: &str) -> Result<Option<String>, RouxError>;
}

/// Extension to parser registry. Cloning shares the underlying map.
#[derive(Clone)]
pub struct ParserMap(Arc<RwLock<BTreeMap<String, Arc<dyn DocumentParser>>>>);

impl std::fmt::Debug for ParserMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ParserMap").field(&self.extensions()).finish()
    }
}

impl ParserMap {
    /// Registry with the built-in markdown parser. `default_link_extension` is appended to link
    /// targets written without one.
    pub fn create(default_link_extension: &str) -> Self {
        let map = ParserMap(Arc::new(RwLock::new(BTreeMap::new())));
        map.insert("md", Arc::new(md::MarkdownParser::new(default_link_extension)));
        map
    }

    pub fn insert(&self, extension: &str, parser: Arc<dyn DocumentParser>) {
        let ext = extension.trim_start_matches('.').to_lowercase();
        tracing::debug!("[ParserMap] Registering parser for .{ext}");
        self.0.write().insert(ext, parser);
    }

    pub fn get(&self, extension: &str) -> Option<Arc<dyn DocumentParser>> {
        self.0.read().get(&extension.to_lowercase()).cloned()
    }

    pub fn extensions(&self) -> Vec<String> {
        self.0.read().keys().cloned().collect()
    }

    pub fn contains(&self, extension: &str) -> bool {
        self.0.read().contains_key(&extension.to_lowercase())
    }
}
