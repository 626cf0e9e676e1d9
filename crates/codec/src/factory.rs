//! Codec selection.
//!
//! One [`CodecFactory`] is chosen per session. Its [`FormatTag`] is written
//! into every thread record so readers dispatch on it without guessing.

use crate::debug::DebugSequence;
use crate::grammar::{GrammarSequence, SharedGrammar};
use crate::gzip::GzipSequence;
use crate::sequence::TraceSequence;
use crate::uncompressed::UncompressedSequence;
use std::sync::Arc;
use tracestore_core::{Error, FormatTag, Result, SequenceKind};
use tracestore_storage::StreamStore;

/// Default gzip compression level.
pub const DEFAULT_GZIP_LEVEL: u32 = 6;

/// Creates trace sequences for one session.
#[derive(Clone)]
pub enum CodecFactory {
    /// Discard all values
    Debug,
    /// Fixed-width values, one stream per sequence
    Uncompressed {
        /// Store providing the streams
        store: StreamStore,
    },
    /// Gzip-wrapped fixed-width values, one stream per sequence
    Gzip {
        /// Store providing the streams
        store: StreamStore,
        /// Compression level, 0-9
        level: u32,
    },
    /// Delta values appended to one shared grammar
    Sequitur {
        /// The session grammar
        grammar: Arc<SharedGrammar>,
    },
}

impl CodecFactory {
    /// Build the factory for `format` over `store`.
    pub fn new(format: FormatTag, store: &StreamStore, gzip_level: u32) -> Result<Self> {
        if gzip_level > 9 {
            return Err(Error::Config(format!(
                "gzip level {} outside 0-9",
                gzip_level
            )));
        }
        Ok(match format {
            FormatTag::Debug => CodecFactory::Debug,
            FormatTag::Uncompressed => CodecFactory::Uncompressed {
                store: store.clone(),
            },
            FormatTag::Gzip => CodecFactory::Gzip {
                store: store.clone(),
                level: gzip_level,
            },
            FormatTag::Sequitur => CodecFactory::Sequitur {
                grammar: Arc::new(SharedGrammar::new()),
            },
        })
    }

    /// Format tag persisted for sequences from this factory.
    pub fn format(&self) -> FormatTag {
        match self {
            CodecFactory::Debug => FormatTag::Debug,
            CodecFactory::Uncompressed { .. } => FormatTag::Uncompressed,
            CodecFactory::Gzip { .. } => FormatTag::Gzip,
            CodecFactory::Sequitur { .. } => FormatTag::Sequitur,
        }
    }

    /// Shared grammar, for the grammar codec only.
    pub fn grammar(&self) -> Option<&Arc<SharedGrammar>> {
        match self {
            CodecFactory::Sequitur { grammar } => Some(grammar),
            _ => None,
        }
    }

    /// Create an empty sequence of `kind`.
    ///
    /// Stream-backed codecs allocate their stream here.
    pub fn create(&self, kind: SequenceKind) -> Result<Box<dyn TraceSequence>> {
        Ok(match self {
            CodecFactory::Debug => Box::new(DebugSequence::new(kind)),
            CodecFactory::Uncompressed { store } => {
                Box::new(UncompressedSequence::new(kind, store.create_stream()?))
            }
            CodecFactory::Gzip { store, level } => {
                Box::new(GzipSequence::new(kind, store.create_stream()?, *level))
            }
            CodecFactory::Sequitur { grammar } => {
                Box::new(GrammarSequence::new(kind, Arc::clone(grammar)))
            }
        })
    }
}

impl std::fmt::Debug for CodecFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("CodecFactory")
            .field(&self.format().name())
            .finish()
    }
}
