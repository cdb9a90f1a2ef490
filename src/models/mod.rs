pub mod event;
pub mod report;

pub use event::{
    bounded, limits, DeviceSize, DeviceType, EventAttributes, EventRow, NewEvent, RegisterOutcome, SourceType,
    StoredEvent, PAGEVIEW,
};
pub use report::{
    BrowserStats, Dimension, DimensionCount, PageCount, ReferrerStats, StatsReport,
    SummaryCounts, TrendPeriod, TrendPoint, ViewRow, ViewsPage,
};
