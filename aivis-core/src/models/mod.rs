pub mod brand;
pub mod prompt;
pub mod response;
pub mod run;
pub mod suggestion;
pub mod topic;

pub use brand::{Brand, BrandCatalog};
pub use prompt::{Prompt, PromptStatus};
pub use response::{Intent, LinkRecord, MentionRecord, ResponseRecord, Sentiment};
pub use run::{Run, RunMetrics, RunStatus};
pub use suggestion::NewSuggestion;
pub use topic::{Persona, SearchQueryStat, Topic};
