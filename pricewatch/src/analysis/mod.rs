pub mod averages;
pub mod detector;
pub mod engine;
pub mod summary;

pub use averages::{AverageReport, DayVsAverage, VsAverage, against_average};
pub use detector::{ChangeDetector, Classification, DetectorConfig};
pub use engine::{AnalysisEngine, PriceSource};
pub use summary::{EventCounts, EventSummary};
