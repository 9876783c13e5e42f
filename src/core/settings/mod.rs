//! Iron settings
//! Wire codec, the typed settings snapshot and the orchestrator that keeps it
//! in sync with the connected iron.

pub mod codec;
pub mod model;
pub mod orchestrator;

pub use codec::{decode, encode, SettingValue, TimeUnit, ValueKind};
pub use model::{
    AdvancedSettings, AnimationSpeed, DisplayOrientation, LockingBehavior, Ordinal, PowerSettings,
    PowerSource, ScrollingSpeed, SettingsGroup, SettingsSnapshot, SleepSettings,
    SolderingSettings, StartupBehavior, TempUnit, UiSettings,
};
pub use orchestrator::SettingsOrchestrator;
