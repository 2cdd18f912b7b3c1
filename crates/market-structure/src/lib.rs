//! Price-structure validators: trend (T), zones (Z) and gap (V).

pub mod referents;
pub mod structure;
pub mod validation;

pub use referents::{calculate_referents, Level, LevelKind, ReferentConfig, Referents};
pub use structure::{StructureAnalysis, StructureDetector, TrendPhase, TrendStrength};
pub use validation::{
    validate_gap, validate_gap_for_side, validate_trend, validate_zones, CompleteValidation,
    GapQuality, GapValidation, TzvComponent, TzvReport, TzvValidator, ValidationResult,
    ZoneClarity, ZoneValidation,
};
