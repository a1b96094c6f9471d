//! Adaptive regime control
//!
//! Every `check_interval_days`, once `min_data_days` bars exist, the trailing
//! window is classified into a market scenario. A scenario different from the
//! active one, detected with enough confidence, rescales the active
//! parameters from the baseline captured at the first check.

pub mod controller;
pub mod scenario;

pub use controller::{AdaptationEvent, AdaptiveController, ParameterChange, WhipsawMonitor};
pub use scenario::{classify, DetectedScenario, ParameterMultipliers, ScenarioKind, WindowMetrics};
