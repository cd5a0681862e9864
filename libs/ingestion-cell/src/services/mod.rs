pub mod dates;
pub mod extractor;
pub mod parse_errors;
pub mod pipeline;
pub mod registry;

pub use extractor::TextExtractor;
pub use parse_errors::{
    InMemoryParseErrorStore, LoggingNotifier, ParseErrorService, ParseErrorStore, ParseFailureNotifier,
    SupabaseParseErrorStore,
};
pub use pipeline::IngestionPipeline;
pub use registry::{ParserRegistry, SiteProfile, Strategy, StrategySelection};
